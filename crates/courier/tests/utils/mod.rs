mod mock;

use anyhow::{Context as _, Error};
use courier::{message::Sender, World};

pub use self::mock::{given_fail_actor, given_mock_actor, ActorInfo, MockMessage};

pub fn when_sent_message_to(
    world: &mut World,
    sender: &Sender<MockMessage>,
    message: MockMessage,
) -> Result<(), Error> {
    sender.send(message)?;

    world
        .run_until_idle()
        .context("failed to process after sending")?;

    Ok(())
}

pub fn then_actor_dropped(actor: &ActorInfo) {
    assert!(actor.dropped.get(), "actor not dropped");
}
