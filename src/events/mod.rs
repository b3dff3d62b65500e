//! Change signals shared between otherwise unrelated components.

mod bus;
mod signal;

pub use bus::{EventBus, Handler, Subscription};
pub use signal::{
    Detail, DiaryChange, Epoch, FastingChange, Payload, Signal, SignalName, SignalPayload,
    ThemePreference, UnknownSignal, detail_for,
};
