mod utils;

use anyhow::Error;
use courier::{message::Mailbox, Actor, Metadata, World};
use tracing_test::traced_test;

use crate::utils::{
    given_fail_actor, given_mock_actor, then_actor_dropped, when_sent_message_to, MockMessage,
};

#[test]
#[traced_test]
fn send_message_to_actor() -> Result<(), Error> {
    let mut world = World::default();
    let actor = given_mock_actor(&mut world)?;

    when_sent_message_to(&mut world, &actor.sender, MockMessage::Count)?;
    when_sent_message_to(&mut world, &actor.sender, MockMessage::Count)?;
    assert_eq!(actor.count.get(), 2);

    when_sent_message_to(&mut world, &actor.sender, MockMessage::Stop)?;
    then_actor_dropped(&actor);
    assert!(world.is_empty());

    Ok(())
}

#[test]
#[traced_test]
fn stopped_actor_mailbox_closed() -> Result<(), Error> {
    let mut world = World::default();
    let actor = given_mock_actor(&mut world)?;

    when_sent_message_to(&mut world, &actor.sender, MockMessage::Stop)?;

    assert!(actor.sender.is_closed());
    assert!(actor.sender.send(MockMessage::Count).is_err());

    Ok(())
}

#[test]
#[traced_test]
fn failed_stopped() -> Result<(), Error> {
    let mut world = World::default();
    let actor = given_fail_actor(&mut world)?;

    when_sent_message_to(&mut world, &actor.sender, MockMessage::Count)?;

    then_actor_dropped(&actor);
    assert_eq!(actor.count.get(), 0);
    assert!(logs_contain("mock intentional fail"));

    Ok(())
}

#[test]
#[traced_test]
fn signal_not_doubled() -> Result<(), Error> {
    let mut world = World::default();
    let actor = given_mock_actor(&mut world)?;

    // Both messages are handled in a single processing step
    actor.sender.send(MockMessage::Count)?;
    actor.sender.send(MockMessage::Count)?;
    world.run_until_idle()?;

    assert_eq!(actor.count.get(), 2);

    Ok(())
}

#[test]
#[traced_test]
fn orphaned_mailbox_detected() {
    let mailbox = Mailbox::<()>::floating();
    assert!(mailbox.is_orphaned());

    let sender = mailbox.sender();
    assert!(!mailbox.is_orphaned());

    drop(sender);
    assert!(mailbox.is_orphaned());
}

#[test]
#[traced_test]
fn failed_register_not_inserted() {
    let mut world = World::default();

    let result = world.insert("fail-register", FailRegister);

    assert!(result.is_err());
    assert!(world.is_empty());
}

struct FailRegister;

impl Actor for FailRegister {
    fn register(&mut self, _world: &mut World, _meta: &mut Metadata) -> Result<(), Error> {
        anyhow::bail!("refusing to register")
    }

    fn process(&mut self, _world: &mut World, _meta: &mut Metadata) -> Result<(), Error> {
        Ok(())
    }
}
