//! Name mapping between entity definitions and the database
//!
//! Entities, fields and relations are declared in camelCase; tables and
//! columns are their snake_case forms. Owned relations live in a column named
//! after the relation with an `_id` suffix.

/// `loadOrder` -> `load_order`, `Ship` -> `ship`
pub fn camel_to_snake(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 4);
    for (i, ch) in input.char_indices() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// `load_order` -> `loadOrder`
pub fn snake_to_camel(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut upper_next = false;
    for ch in input.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

pub fn suffix_id(column: &str) -> String {
    format!("{column}_id")
}

/// Column holding the foreign key of an owned relation named `relation`
pub fn foreign_key_column(relation: &str) -> String {
    suffix_id(&camel_to_snake(relation))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camel_to_snake() {
        assert_eq!(camel_to_snake("Ship"), "ship");
        assert_eq!(camel_to_snake("loadOrders"), "load_orders");
        assert_eq!(camel_to_snake("LoadOrder"), "load_order");
        assert_eq!(camel_to_snake("id"), "id");
        assert_eq!(camel_to_snake("createdAtUtc"), "created_at_utc");
    }

    #[test]
    fn test_snake_to_camel() {
        assert_eq!(snake_to_camel("load_orders"), "loadOrders");
        assert_eq!(snake_to_camel("id"), "id");
    }

    #[test]
    fn test_foreign_key_column() {
        assert_eq!(foreign_key_column("ship"), "ship_id");
        assert_eq!(foreign_key_column("homePort"), "home_port_id");
    }
}
