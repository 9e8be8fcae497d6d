// Helper for generating UUIDv7 (timestamp-sortable UUIDs)
//
// Refresh token rows are keyed by UUIDv7 so that a family's chain sorts in
// issue order. PostgreSQL user IDs come from gen_random_uuid() (v4).

use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable).
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}
