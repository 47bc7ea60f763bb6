use toml::Value;

/// Merge `overlay` into `base`.
///
/// Tables merge key by key; any other value in `overlay` (including arrays)
/// replaces the value in `base`.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Table(base_table), Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                match base_table.get_mut(key) {
                    Some(base_val) => deep_merge(base_val, overlay_val),
                    None => {
                        base_table.insert(key.clone(), overlay_val.clone());
                    },
                }
            }
        },
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Look up a dotted path (`deploy.hot_deploy`) in a TOML tree.
#[must_use]
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, key| current.get(key))
}

/// Set a dotted path, creating intermediate tables as needed.
pub fn set_path(value: &mut Value, path: &str, new_value: Value) {
    let mut current = value;
    let mut keys = path.split('.').peekable();
    while let Some(key) = keys.next() {
        let Value::Table(table) = current else {
            return;
        };
        if keys.peek().is_none() {
            table.insert(key.to_owned(), new_value);
            return;
        }
        current = table
            .entry(key.to_owned())
            .or_insert_with(|| Value::Table(toml::map::Map::new()));
    }
}
