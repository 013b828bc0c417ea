use uuid::Uuid;

/// Generate a fresh database row id.
pub fn db_id() -> Uuid {
    Uuid::new_v4()
}
