use snowflake::SnowflakeIdBucket;
use std::sync::Mutex;

static ID_GENERATOR: Mutex<Option<SnowflakeIdBucket>> = Mutex::new(None);

/// Initialize the snowflake ID generator.
///
/// `machine_id` and `node_id` must each be in 0-31. Call once at process
/// start; [`next_id`] falls back to `(1, 1)` if initialization was skipped.
pub fn init(machine_id: i32, node_id: i32) {
    let mut gen = ID_GENERATOR.lock().unwrap_or_else(|p| p.into_inner());
    *gen = Some(SnowflakeIdBucket::new(machine_id, node_id));
}

/// Generate a snowflake ID as a string.
pub fn next_id() -> String {
    let mut gen = ID_GENERATOR.lock().unwrap_or_else(|p| p.into_inner());
    let bucket = gen.get_or_insert_with(|| SnowflakeIdBucket::new(1, 1));
    bucket.get_id().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn next_id_returns_unique_ids() {
        init(1, 1);
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            let id = next_id();
            assert!(!id.is_empty());
            assert!(ids.insert(id), "Duplicate ID generated");
        }
    }

    #[test]
    fn next_id_is_numeric() {
        init(1, 1);
        let id = next_id();
        assert!(id.parse::<i64>().is_ok(), "ID should be a valid i64: {id}");
    }
}
