pub mod payment;
pub mod stream;
pub mod whitelist;

pub use payment::PaymentRepository;
pub use stream::StreamRepository;
pub use whitelist::WhitelistRepository;
