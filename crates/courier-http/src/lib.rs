//! HTTP/1.x server core for courier.
//!
//! Every accepted connection is driven by its own actor, which reads requests through a
//! `Framer`, hands them to the application as `HttpEvent`s, and commits the responses it gets
//! back, until keep-alive ends or the connection fails.

pub mod body;
mod config;
mod connection;
mod error;
mod framer;
mod listener;
pub mod message;
mod response;
mod service;
pub mod websocket;

use anyhow::Error;
use bytes::Bytes;
use courier::message::{Mailbox, Sender};
use courier_mio::{net::tcp, CompletionPool};

pub use self::{
    config::HttpConfig,
    error::{FramingError, HttpError, Respond},
    framer::Framer,
    listener::{listen, ServerAction},
    message::Request,
    response::{Response, ResponseBody, ResponseHeaders},
    service::{serve_fn, Router},
};

pub enum HttpEvent {
    Request(RequestEvent),
    /// A connection completed a WebSocket handshake and is no longer HTTP.
    Upgraded(UpgradedEvent),
}

pub struct RequestEvent {
    pub request: Request,
    /// Sender for the answer to this request.
    ///
    /// HTTP/1.1 can't be multiplexed, the connection waits for this answer before reading the
    /// next request.
    pub actions: Sender<RequestAction>,
}

pub enum RequestAction {
    Respond(Response),
    /// The handler failed, a `Respond` error is still sent as a normal response.
    Fail(Error),
}

/// Raw connection handed over after a WebSocket handshake.
pub struct UpgradedEvent {
    /// The upgrade request.
    pub request: Request,
    /// Stream events, floating until the receiver binds its signal.
    pub events: Mailbox<tcp::StreamEvent>,
    pub actions: Sender<tcp::StreamAction>,
    pub pool: CompletionPool,
    /// Bytes the client sent after the handshake, already read from the socket.
    pub leftover: Bytes,
}
