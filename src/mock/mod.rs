pub mod listener;
pub mod server;
pub mod validator;

pub use listener::{ListenerAdapter, ObservedNotification, Outcome};
pub use server::{AcceptAllHandler, MockHandler, MockServer};
pub use validator::{DeviceRegistry, RawRequest, Rejection, ValidatedRequest, Validator};
