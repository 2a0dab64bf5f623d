use std::{
    cell::RefCell,
    collections::VecDeque,
    rc::{Rc, Weak},
};

use anyhow::{anyhow, Context as _, Error};
use thiserror::Error;

use crate::message::Signal;

/// Shared *single-threaded* multi-sender message queue.
///
/// An instance of `Mailbox` is considered 'authoritative'.
/// You can use it to create senders, and register the actor that should be notified.
pub struct Mailbox<M> {
    inner: Rc<RefCell<MailboxInner<M>>>,
}

struct MailboxInner<M> {
    queue: VecDeque<M>,
    notify: Notify,
}

enum Notify {
    Pending,
    Signal(Signal),
    Floating,
}

impl<M> Default for Mailbox<M> {
    fn default() -> Self {
        let inner = MailboxInner {
            queue: VecDeque::new(),
            notify: Notify::Pending,
        };

        Self {
            inner: Rc::new(RefCell::new(inner)),
        }
    }
}

impl<M> Mailbox<M> {
    /// Create a mailbox that is managed externally from a `World`, not sending a signal.
    ///
    /// Messages still queue up, so a floating mailbox can be handed to another actor, which then
    /// binds its signal with `set_signal`.
    pub fn floating() -> Self {
        let mailbox = Self::default();
        mailbox.set_floating();
        mailbox
    }

    /// Create a new `Sender` that sends to this mailbox.
    pub fn sender(&self) -> Sender<M> {
        Sender {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Set the `Signal` to be sent when this mailbox receives a message.
    ///
    /// Only one signal can be set at a time, setting this will remove the previous value.
    /// If messages are already queued, the signal is sent immediately.
    pub fn set_signal(&self, signal: Signal) -> Result<(), SendError> {
        let mut inner = self.inner.borrow_mut();

        if !inner.queue.is_empty() {
            signal.send().context("failed to notify for queued messages")?;
        }
        inner.notify = Notify::Signal(signal);

        Ok(())
    }

    /// Set this mailbox to be managed externally from a `World`, not sending a signal.
    pub fn set_floating(&self) {
        self.inner.borrow_mut().notify = Notify::Floating;
    }

    /// Get the next message, if any is available.
    pub fn recv(&self) -> Option<M> {
        self.inner.borrow_mut().queue.pop_front()
    }

    /// Returns true if every sender of this mailbox has been dropped.
    ///
    /// Nothing can arrive in an orphaned mailbox anymore, besides what is already queued.
    pub fn is_orphaned(&self) -> bool {
        Rc::weak_count(&self.inner) == 0
    }
}

/// Sending utility, for sending messages to a mailbox.
pub struct Sender<M> {
    inner: Weak<RefCell<MailboxInner<M>>>,
}

impl<M> Sender<M> {
    /// Send a message to the target mailbox of this sender.
    pub fn send(&self, message: M) -> Result<(), SendError> {
        // Check if the mailbox is still available
        let Some(inner) = self.inner.upgrade() else {
            return Err(anyhow!("mailbox closed").into());
        };
        let mut inner = inner.borrow_mut();

        // Notify a listening actor, do this first, so we know there's no inner error first
        match &inner.notify {
            Notify::Pending => {
                return Err(anyhow!("mailbox has no signal and isn't marked floating").into());
            }
            Notify::Signal(signal) => {
                signal.send().context("failed to notify registered actor")?;
            }
            Notify::Floating => {}
        }

        // Apply the message to the queue
        inner.queue.push_back(message);

        Ok(())
    }

    /// Returns true if the receiving mailbox no longer exists.
    pub fn is_closed(&self) -> bool {
        self.inner.strong_count() == 0
    }
}

impl<M> Clone for Sender<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Error while sending a message.
#[derive(Error, Debug)]
#[error("sending message failed")]
pub struct SendError {
    #[from]
    source: Error,
}
