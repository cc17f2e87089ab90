pub mod id;
pub mod payment;
pub mod session;
pub mod stream;

pub use id::{generate_id, PaymentId, StreamId};
pub use payment::{Payment, PaymentStatus};
pub use session::{DeviceBinding, Session};
pub use stream::{Stream, StreamStatus};
