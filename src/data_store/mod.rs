/// Per-key version chains shared by every transaction of a store.
pub mod txn_buffer;
/// A record stamped with the commit that wrote it.
pub mod versioned_value;
