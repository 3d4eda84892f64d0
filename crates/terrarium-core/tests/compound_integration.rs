use terrarium_core::{
    AgentError, Classifier, CompoundAgent, EngineConfig, EngineVersion, Hotspot, Part, RenderKey,
    ScriptValue, SpriteSpec, Tick, World, WorldError, MASK_CREATURE,
};

fn vending_machine() -> CompoundAgent {
    let sprite = SpriteSpec::new("vendor", 0, 12);
    let mut agent = CompoundAgent::with_classification(Classifier::new(2, 6, 1), 200, sprite)
        .expect("classified agent");

    // coin slot and dispenser flap drawn above the cabinet
    for (id, z) in [(1_u32, 2_u32), (2, 1)] {
        let sequence = agent.next_part_sequence_number();
        let part = Part::new(id, SpriteSpec::new("vendor", 12 + id, 1), sequence)
            .with_placement(4, 8 * id as i32, z)
            .with_animation(vec![0, 1, 2, terrarium_core::ANIM_LOOP]);
        agent.add_part(part).expect("part added");
    }
    agent
}

#[test]
fn legacy_world_end_to_end() {
    let mut world = World::new(EngineConfig {
        version: EngineVersion::V1,
        default_plane: 500,
    });

    let id = world.spawn(vending_machine());
    assert_eq!(world.agent_count(), 1);
    assert_eq!(world.zorder().len(), 3);

    // base part first, then the flap (z 1), then the coin slot (z 2)
    let agent = world.agent(id).expect("agent");
    let ids: Vec<u32> = agent.parts().map(Part::id).collect();
    assert_eq!(ids, vec![0, 2, 1]);

    {
        let agent = world.agent_mut(id).expect("agent");
        agent.core_mut().position = terrarium_core::Position::new(300.0, 120.0);
        agent.set_hotspot_loc(0, 0, 0, 32, 48).expect("loc");
        agent.set_hotspot_func(3, 0).expect("func");
        agent.set_hotspot_func(4, 0).expect("func");
    }

    // V1 starts scanning at slot 3 and derives the script from the
    // slot offset: slot 3 wins with message 0 -> script 1.
    assert_eq!(world.handle_click(id, 316.0, 144.0), Ok(Some(1)));
    assert_eq!(world.handle_click(id, 50.0, 50.0), Ok(None));

    // run the machine for a while; animations loop, base tick counts
    for _ in 0..10 {
        world.step();
    }
    assert_eq!(world.tick(), Tick(10));
    let agent = world.agent(id).expect("agent");
    assert_eq!(agent.core().age_ticks(), 10);
    assert!(agent.parts().all(|part| part.id() == 0 || part.pose() <= 2));

    // activation scripts do not re-fire while active on legacy engines
    world.agent_mut(id).expect("agent").core_mut().activation = Some(1);
    assert_eq!(
        world.fire_script(id, 1, None, ScriptValue::Void, ScriptValue::Void),
        Ok(false)
    );
    assert_eq!(
        world.fire_script(id, 0, None, ScriptValue::Int(7), ScriptValue::Void),
        Ok(true)
    );
    let fired = world.drain_fired();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].1.event, 0);
    assert_eq!(fired[0].1.arg1, ScriptValue::Int(7));
}

#[test]
fn plane_moves_are_atomic_across_agents() {
    let mut world = World::new(EngineConfig {
        version: EngineVersion::V2,
        default_plane: 500,
    });

    let a = world.spawn(vending_machine());
    let b = world.spawn(vending_machine());
    assert_eq!(world.zorder().len(), 6);

    // move agent A onto agent B's plane; sequence numbers keep the
    // registrations distinct, so nothing is lost in the sweep
    world.set_plane(a, 200).expect("set plane");
    assert_eq!(world.zorder().len(), 6);

    world.set_plane(a, 900).expect("set plane");
    assert_eq!(world.zorder().len(), 6);
    assert!(world.zorder().contains(&RenderKey {
        plane: 900,
        sequence: 0
    }));
    assert!(world.zorder().contains(&RenderKey {
        plane: 200,
        sequence: 0
    }));

    world.remove(b).expect("remove");
    assert_eq!(world.zorder().len(), 3);
    assert!(world.zorder().iter().all(|entry| entry.agent == a));
}

#[test]
fn creature_only_regions_ignore_pointer_clicks_on_v2() {
    let mut world = World::new(EngineConfig {
        version: EngineVersion::V2,
        default_plane: 500,
    });
    let id = world.spawn_from_sprite(SpriteSpec::new("lift", 0, 4));
    {
        let agent = world.agent_mut(id).expect("agent");
        assert_eq!(agent.core().plane(), 500);
        assert_eq!(agent.part_count(), 0);
        agent.set_hotspot_loc(0, 0, 0, 64, 64).expect("loc");
        agent.set_hotspot_func(0, 0).expect("func");
        agent
            .set_hotspot_func_details(0, 0, MASK_CREATURE)
            .expect("details");
    }
    assert_eq!(world.handle_click(id, 10.0, 10.0), Ok(None));

    let stale = id;
    world.remove(id).expect("remove");
    assert_eq!(
        world.handle_click(stale, 10.0, 10.0),
        Err(WorldError::UnknownAgent)
    );
}

#[test]
fn part_mutation_errors_leave_world_untouched() {
    let mut world = World::new(EngineConfig::default());
    let id = world.spawn(vending_machine());
    let before = world.zorder().len();

    let sequence = {
        let agent = world.agent_mut(id).expect("agent");
        agent.next_part_sequence_number()
    };
    let duplicate = Part::new(1, SpriteSpec::new("vendor", 0, 1), sequence);
    assert_eq!(
        world.add_part(id, duplicate),
        Err(WorldError::Agent(AgentError::DuplicatePartId { id: 1 }))
    );
    assert_eq!(world.zorder().len(), before);

    assert_eq!(
        world.del_part(id, 42),
        Err(WorldError::Agent(AgentError::PartNotFound { id: 42 }))
    );
    assert_eq!(world.zorder().len(), before);
    assert_eq!(world.agent(id).expect("agent").part_count(), 3);
}

#[test]
fn snapshots_round_trip_through_json() {
    let mut world = World::new(EngineConfig {
        version: EngineVersion::V2,
        default_plane: 500,
    });
    let id = world.spawn(vending_machine());
    world
        .agent_mut(id)
        .expect("agent")
        .set_hotspot_loc(2, 1, 2, 3, 4)
        .expect("loc");
    world.step();

    let snapshot = world.snapshot();
    assert_eq!(snapshot.tick, Tick(1));
    assert_eq!(snapshot.agents.len(), 1);
    assert_eq!(snapshot.agents[0].parts.len(), 3);
    assert_eq!(snapshot.agents[0].hotspots[2], Hotspot::new(1, 2, 3, 4));

    let json = serde_json::to_string(&snapshot).expect("serialize");
    let restored: terrarium_core::WorldSnapshot =
        serde_json::from_str(&json).expect("deserialize");
    assert_eq!(restored, snapshot);
}
