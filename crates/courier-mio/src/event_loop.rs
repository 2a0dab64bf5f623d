use anyhow::Error;
use courier::World;
use mio::Events;
use tracing::{event, instrument, Level};

use crate::Registry;

/// Run the mio event loop, until no actors are left in the world.
#[instrument("mio-event-loop", skip_all)]
pub fn run_event_loop(world: &mut World, registry: &Registry) -> Result<(), Error> {
    let mut events = Events::with_capacity(256);

    loop {
        // Process all pending actor messages, including wake events
        event!(Level::TRACE, "processing pending actors");
        world.run_until_idle()?;

        if world.is_empty() {
            event!(Level::DEBUG, "no actors left, stopping event loop");
            return Ok(());
        }

        registry.poll(&mut events, None)?;

        for event in events.iter() {
            // Closed and errored sources are reported as ready, the next operation reports why
            let readable = event.is_readable() || event.is_read_closed() || event.is_error();
            let writable = event.is_writable() || event.is_write_closed() || event.is_error();

            registry.wake(event.token(), readable, writable);
        }
    }
}
