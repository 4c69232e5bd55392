//! Concurrency primitives shared by the dispatcher and reaper loops.
//!
//! Three small building blocks with no business logic of their own:
//!
//! - The [`shutdown`] module implements the one-way shutdown flag observed by
//!   every loop. The flag is level-triggered, so receivers created after
//!   shutdown was signalled still observe it.
//! - The [`gate`] module implements the capacity gate bounding how many
//!   analyzer workers can be live at once. Units are RAII permits, so a
//!   release can never outnumber the acquisitions.
//! - The [`queue`] module implements the bounded completion queue carrying
//!   spawned worker handles from the dispatcher to the reaper.

pub mod gate;
pub mod queue;
pub mod shutdown;
