//! Consistency checks on entity definitions

use super::{EntityDef, RelationKind};
use crate::error::{ErrorContext, OrmCode, OrmError};
use std::collections::{BTreeMap, BTreeSet};

const OPERATION: &str = "entityDefinitionValidation";

fn relation_error(code: OrmCode, entity: &str, relation: &str) -> OrmError {
    OrmError::new(code, ErrorContext::new(OPERATION).entity(entity).relation(relation))
}

pub(crate) fn check_entity_definitions(defs: &[EntityDef]) -> Result<(), OrmError> {
    let mut by_name: BTreeMap<&str, &EntityDef> = BTreeMap::new();
    for def in defs {
        if by_name.insert(def.name.as_str(), def).is_some() {
            return Err(OrmError::new(
                OrmCode::ConflictingNames,
                ErrorContext::new(OPERATION).entity(&def.name),
            ));
        }
    }

    for def in defs {
        let has_id = def
            .members
            .iter()
            .any(|(name, member)| name == "id" && matches!(member, super::Member::Field(_)));
        if !has_id {
            return Err(OrmError::new(
                OrmCode::MissingIdField,
                ErrorContext::new(OPERATION).entity(&def.name),
            ));
        }
    }

    // a name may appear once across fields and all four relation kinds
    for def in defs {
        let mut seen = BTreeSet::new();
        for (name, _) in &def.members {
            if !seen.insert(name.as_str()) {
                return Err(OrmError::new(
                    OrmCode::ConflictingNames,
                    ErrorContext::new(OPERATION).entity(&def.name).field(name),
                ));
            }
        }
    }

    for def in defs {
        for (name, member) in &def.members {
            if let super::Member::Relation(_, decl) = member {
                if !by_name.contains_key(decl.target.as_str()) {
                    return Err(relation_error(OrmCode::UnknownRelationTarget, &def.name, name));
                }
            }
        }
    }

    for def in defs {
        for (name, decl) in def.relations_of(RelationKind::OneToMany) {
            let matched = decl.inverse.as_deref().is_some_and(|inverse| {
                by_name[decl.target.as_str()]
                    .relations_of(RelationKind::ManyToOne)
                    .any(|(n, _)| n == inverse)
            });
            if !matched {
                return Err(relation_error(OrmCode::OneToManyWithoutManyToOne, &def.name, name));
            }
        }
    }

    for def in defs {
        for (name, decl) in def.relations_of(RelationKind::OneToOneInverse) {
            let matched = decl.inverse.as_deref().is_some_and(|inverse| {
                by_name[decl.target.as_str()]
                    .relations_of(RelationKind::OneToOneOwned)
                    .any(|(n, _)| n == inverse)
            });
            if !matched {
                return Err(relation_error(OrmCode::OneToOneInverseWithoutOwned, &def.name, name));
            }
        }
    }

    for def in defs {
        if let Some((name, _)) = def
            .relations_of(RelationKind::OneToMany)
            .find(|(_, decl)| decl.nullable.is_some())
        {
            return Err(relation_error(OrmCode::OneToManyNullable, &def.name, name));
        }
        if let Some((name, _)) = def
            .relations_of(RelationKind::OneToOneOwned)
            .find(|(_, decl)| decl.inverse.is_some())
        {
            return Err(relation_error(OrmCode::OneToOneOwnedInverse, &def.name, name));
        }
        if let Some((name, _)) = def
            .relations_of(RelationKind::ManyToOne)
            .find(|(_, decl)| decl.inverse.is_some())
        {
            return Err(relation_error(OrmCode::ManyToOneInverse, &def.name, name));
        }
    }

    Ok(())
}
