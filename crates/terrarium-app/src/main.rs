use anyhow::{Result, bail};
use clap::Parser;
use terrarium_core::{
    Classifier, CompoundAgent, EngineConfig, EngineVersion, Part, Position, ScriptValue,
    SpriteSpec, World,
};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "terrarium", about = "Compound agent demo shell")]
struct Args {
    /// Engine generation to emulate (1, 2, or 3).
    #[arg(long, default_value_t = 2)]
    version: u8,
    /// Number of simulation ticks to run.
    #[arg(long, default_value_t = 120)]
    ticks: u64,
    /// Print a JSON world snapshot after the run.
    #[arg(long)]
    snapshot: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let version = parse_version(args.version)?;

    let mut world = World::new(EngineConfig {
        version,
        default_plane: 500,
    });
    let machine = spawn_machine(&mut world)?;
    info!(?version, agents = world.agent_count(), "World bootstrapped");

    for _ in 0..args.ticks {
        world.step();
    }
    info!(tick = world.tick().0, "Simulation ran");

    // poke the machine: one click on the button hotspot, one miss
    for (x, y) in [(148.0, 260.0), (10.0, 10.0)] {
        match world.handle_click(machine, x, y) {
            Ok(Some(script)) => {
                let handled =
                    world.fire_script(machine, script, None, ScriptValue::Void, ScriptValue::Void)?;
                info!(x, y, script, handled, "Click dispatched");
            }
            Ok(None) => info!(x, y, "Click missed every hotspot"),
            Err(err) => warn!(%err, "Click dispatch failed"),
        }
    }

    for (agent, script) in world.drain_fired() {
        info!(?agent, event = script.event, "Script queued for the VM");
    }

    if args.snapshot {
        println!("{}", serde_json::to_string_pretty(&world.snapshot())?);
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn parse_version(raw: u8) -> Result<EngineVersion> {
    Ok(match raw {
        1 => EngineVersion::V1,
        2 => EngineVersion::V2,
        3 => EngineVersion::V3,
        other => bail!("unsupported engine version {other}"),
    })
}

/// A three-part machine with a clickable button region: the base
/// cabinet, an animated lamp, and a button overlay.
fn spawn_machine(world: &mut World) -> Result<terrarium_core::AgentId> {
    let mut agent = CompoundAgent::with_classification(
        Classifier::new(2, 8, 3),
        400,
        SpriteSpec::new("machine", 0, 8),
    )?;
    agent.core_mut().position = Position::new(128.0, 240.0);

    let lamp_sequence = agent.next_part_sequence_number();
    let lamp = Part::new(1, SpriteSpec::new("machine", 8, 4), lamp_sequence)
        .with_placement(12, -6, 2)
        .with_animation(vec![0, 1, 2, 3, terrarium_core::ANIM_LOOP]);
    agent.add_part(lamp)?;

    let button_sequence = agent.next_part_sequence_number();
    let button = Part::new(2, SpriteSpec::new("machine", 12, 1), button_sequence)
        .with_placement(16, 16, 1);
    agent.add_part(button)?;

    // button region, bound through the mirrored legacy slot so V1
    // dispatch (which starts at slot 3) can still reach it
    agent.set_hotspot_loc(0, 12, 12, 28, 28)?;
    agent.set_hotspot_func(0, 0)?;
    agent.set_hotspot_func(3, 0)?;
    // generic binding for the modern click path
    agent.core_mut().click_message = Some(0);

    Ok(world.spawn(agent))
}
