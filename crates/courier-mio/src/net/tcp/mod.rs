mod listener;
mod stream;

pub use self::{
    listener::{listen, ConnectedEvent, ListenerAction, ListenerEvent, ListenerInfo},
    stream::{open, StreamAction, StreamEvent},
};
