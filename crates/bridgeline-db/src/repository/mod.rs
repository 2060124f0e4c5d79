//! Repository layer: query functions organized by table.
//!
//! Everything here is a thin, single-statement wrapper. Multi-statement
//! invariants (cursor + row deletion, counter + in-flight record) are
//! composed inside transactions by [`crate::queue::DestinationQueue`].

pub mod accounts;
pub mod events;
pub mod positions;
pub mod transactions;
