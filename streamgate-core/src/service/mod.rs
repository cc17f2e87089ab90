pub mod access;
pub mod device;

pub use access::{AccessService, GrantedAccess, PaymentConfirmation, RecoveryOutcome};
pub use device::{evaluate_device, DeviceDecision, DeviceGate};
