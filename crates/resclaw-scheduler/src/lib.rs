//! # Resclaw Scheduler
//!
//! Time-triggered dispatch of reservation requests.
//!
//! One one-shot tokio timer per pending slot, owned by a single
//! [`SlotScheduler`] instance with an explicit lifecycle — no ambient global
//! state. When a timer fires, the dispatch routine walks every OPEN customer
//! in the slot's area, records an attempt, and hands the request to the
//! UiPath client. Results arrive later, out-of-band, through the gateway's
//! callback endpoint.
//!
//! ```text
//! SlotScheduler (slot_id → timer)
//!   ├── schedule(id, at)   — arm / atomically re-arm
//!   ├── cancel(id)         — disarm before fire
//!   ├── recover_pending()  — re-arm future slots on boot
//!   └── fire → process_slot: N customers → N attempts → N sends
//! ```

pub mod dispatch;
pub mod engine;

pub use dispatch::process_slot;
pub use engine::SlotScheduler;
