//! Session lifecycle controller for a walk-up photo kiosk.

pub mod capture;
pub mod config;
pub mod controller;
pub mod device;
pub mod durable;
pub mod events;
pub mod heartbeat;
pub mod ledger;
pub mod payment;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use capture::{CaptureOutcome, CaptureSequencer, CaptureState};
pub use config::{CapturePolicy, KioskTimings, MAX_COPIES};
pub use controller::{ControllerDeps, KioskController, RetakeOutcome, SessionCancel};
pub use device::{default_layout, find_frame, DeviceApi, FrameTemplate, FRAME_CATALOG};
pub use durable::{DurableState, MemoryState};
pub use events::KioskEvent;
pub use heartbeat::HeartbeatReporter;
pub use ledger::{FailureLedger, RecoveryPath};
pub use payment::{
    PaymentGateway, PaymentInitiation, PaymentOrder, PaymentVerifier, VerificationOutcome,
    VerificationState,
};
pub use scheduler::{Scheduler, TokioScheduler};
pub use session::{SessionState, SessionView};
pub use transport::{select_transport, HttpTransport, Transport, TransportKind};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod tests_support;
