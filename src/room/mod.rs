//! Rooms and the process-wide room registry.
//!
//! Lock discipline: the registry map and each room's membership are guarded
//! by independent locks, held only for a single lookup or mutation. When
//! both are needed the registry lock is taken first. Neither is ever held
//! across negotiation or I/O; fan-out works on membership snapshots.

mod registry;
mod state;

pub use registry::RoomRegistry;
pub use state::{MembershipError, Room};
