use std::{
    cell::Cell,
    rc::Rc,
};

use anyhow::{bail, Error};
use courier::{
    message::{Mailbox, Sender},
    Actor, Metadata, World,
};

pub fn given_mock_actor(world: &mut World) -> Result<ActorInfo, Error> {
    given_actor(world, false)
}

pub fn given_fail_actor(world: &mut World) -> Result<ActorInfo, Error> {
    given_actor(world, true)
}

fn given_actor(world: &mut World, fail: bool) -> Result<ActorInfo, Error> {
    let actor = MockActor {
        mailbox: Mailbox::default(),
        count: Rc::default(),
        dropped: Rc::default(),
        fail,
    };

    let info = ActorInfo {
        sender: actor.mailbox.sender(),
        count: actor.count.clone(),
        dropped: actor.dropped.clone(),
    };
    world.insert("mock-actor", actor)?;

    Ok(info)
}

pub struct ActorInfo {
    pub sender: Sender<MockMessage>,
    pub count: Rc<Cell<usize>>,
    pub dropped: Rc<Cell<bool>>,
}

pub enum MockMessage {
    Count,
    Stop,
}

struct MockActor {
    mailbox: Mailbox<MockMessage>,
    count: Rc<Cell<usize>>,
    dropped: Rc<Cell<bool>>,
    fail: bool,
}

impl Actor for MockActor {
    fn register(&mut self, world: &mut World, meta: &mut Metadata) -> Result<(), Error> {
        self.mailbox.set_signal(world.signal(meta.id()))?;
        Ok(())
    }

    fn process(&mut self, _world: &mut World, meta: &mut Metadata) -> Result<(), Error> {
        if self.fail {
            bail!("mock intentional fail");
        }

        while let Some(message) = self.mailbox.recv() {
            match message {
                MockMessage::Count => self.count.set(self.count.get() + 1),
                MockMessage::Stop => meta.set_stop(),
            }
        }

        Ok(())
    }
}

impl Drop for MockActor {
    fn drop(&mut self) {
        self.dropped.set(true);
    }
}
