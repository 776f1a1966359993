//! Span constructors shared by the driver and the session

use tracing::Span;

pub fn begin_transaction_span(read_only: bool) -> Span {
    tracing::info_span!("berth.transaction.begin", read_only)
}

pub fn commit_transaction_span() -> Span {
    tracing::info_span!("berth.transaction.commit")
}

pub fn rollback_transaction_span() -> Span {
    tracing::info_span!("berth.transaction.rollback")
}

pub fn transaction_span(transaction_id: u64) -> Span {
    tracing::info_span!("berth.transaction", transaction_id)
}

pub fn execute_query_span(query: &str) -> Span {
    tracing::debug_span!("berth.query", sql = query)
}

pub fn relation_fetch_span(entity: &str, relation: &str) -> Span {
    tracing::debug_span!("berth.relation_fetch", entity, relation)
}
