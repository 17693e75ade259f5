// Auto-build: replay a prior event's scheduling pattern onto a new event.

pub mod analyzer;
pub mod dates;
pub mod executor;
pub mod fallback;
