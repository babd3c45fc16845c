pub mod key_hash;
pub(crate) mod lock_bucket;
pub(crate) mod lock_table;
