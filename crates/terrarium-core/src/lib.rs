//! Core types for the Terrarium compound-agent runtime.
//!
//! A compound agent is a simulated entity assembled from several
//! independently drawn and ticked parts. This crate owns the part
//! collection invariants, the legacy hotspot click-dispatch path, the
//! renderer z-order bookkeeping, and the version-gated script-firing
//! entry point. The scripting VM, sprite formats, and audio tooling
//! live elsewhere and only their contracts appear here.

use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;
use std::collections::{BTreeSet, VecDeque};
use thiserror::Error;

new_key_type! {
    /// Stable handle for compound agents backed by a generational slot map.
    pub struct AgentId;
}

new_key_type! {
    /// Stable handle for parts inside a single agent's arena.
    pub struct PartKey;
}

/// Number of hotspot rectangles and bindings carried by every agent.
pub const HOTSPOT_SLOTS: usize = 6;
/// Binding slots 0..3 are reserved for the creature-only legacy feature.
pub const CREATURE_SLOTS: usize = 3;

/// Binding mask value meaning "creatures only".
pub const MASK_CREATURE: u8 = 1;
/// Binding mask value meaning "mouse only".
pub const MASK_MOUSE: u8 = 2;
/// Binding mask value accepting every dispatch source.
pub const MASK_ALL: u8 = 3;

/// Pose-script byte marking a loop jump in a part animation.
pub const ANIM_LOOP: u8 = 255;

/// Emulated engine generation. Legacy hotspot dispatch only applies to
/// the two older generations; the third uses the generic click path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EngineVersion {
    /// Oldest generation: creature-only binding slots are skipped and
    /// script ids derive from the slot offset alone.
    V1,
    /// Middle generation: bindings are honoured, creature-only masks
    /// exclude pointer clicks.
    V2,
    /// Modern generation: compound hotspot dispatch is bypassed.
    V3,
}

impl EngineVersion {
    /// Whether this generation still uses the compound hotspot path.
    #[must_use]
    pub fn is_legacy(self) -> bool {
        self < Self::V3
    }
}

/// Maps a message number to the script id the VM should run.
///
/// Legacy table: activate 1 and activate 2 shift up by one, deactivate
/// folds to script 0, everything else passes through untouched.
#[must_use]
pub fn calculate_script_id(message: u16) -> u16 {
    match message {
        0 | 1 => message + 1,
        2 => 0,
        other => other,
    }
}

/// High level simulation clock (ticks processed since boot).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// The boot tick.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// World-space position of an agent origin.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    /// Construct a new position.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Family/genus/species classification triple. Fixed at construction.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Classifier {
    pub family: u8,
    pub genus: u8,
    pub species: u16,
}

impl Classifier {
    /// Construct a classification triple.
    #[must_use]
    pub const fn new(family: u8, genus: u8, species: u16) -> Self {
        Self {
            family,
            genus,
            species,
        }
    }

    /// The all-zero triple used by appearance-only agents.
    #[must_use]
    pub const fn unclassified() -> Self {
        Self::new(0, 0, 0)
    }
}

/// Appearance metadata shared by an agent and its base part.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpriteSpec {
    /// Sprite gallery file name, without path or extension.
    pub file: String,
    /// Index of the first image in the gallery used by this agent.
    pub first_image: u32,
    /// Number of images reserved for this agent.
    pub image_count: u32,
}

impl SpriteSpec {
    /// Construct a sprite reference.
    #[must_use]
    pub fn new(file: impl Into<String>, first_image: u32, image_count: u32) -> Self {
        Self {
            file: file.into(),
            first_image,
            image_count,
        }
    }
}

/// Rectangular input region local to the agent origin.
///
/// The all-minus-one rectangle is the "unset" sentinel; dispatch only
/// tests the `left` field when deciding whether a hotspot is live,
/// matching the legacy engines.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hotspot {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Hotspot {
    /// Sentinel rectangle meaning "no hotspot configured".
    pub const UNSET: Self = Self {
        left: -1,
        top: -1,
        right: -1,
        bottom: -1,
    };

    /// Construct a rectangle verbatim. No normalisation is applied;
    /// callers wanting sensible containment supply `left <= right` and
    /// `top <= bottom`.
    #[must_use]
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Whether this slot still holds the unset sentinel.
    #[must_use]
    pub const fn is_unset(&self) -> bool {
        self.left == -1
    }

    /// Inclusive containment test on all four bounds.
    #[must_use]
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.left as f32
            && x <= self.right as f32
            && y >= self.top as f32
            && y <= self.bottom as f32
    }
}

impl Default for Hotspot {
    fn default() -> Self {
        Self::UNSET
    }
}

/// Binding from a hotspot-function slot to a hotspot rectangle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HotspotFunction {
    /// Index into the hotspot array, or -1 when unbound. Out-of-range
    /// values are tolerated and skipped during dispatch.
    pub hotspot: i8,
    /// Message number resolved when the slot matches.
    pub message: u16,
    /// Dispatch-source mask; `MASK_CREATURE` excludes pointer clicks.
    pub mask: u8,
}

impl HotspotFunction {
    /// An unbound slot.
    pub const UNBOUND: Self = Self {
        hotspot: -1,
        message: 0,
        mask: 0,
    };
}

impl Default for HotspotFunction {
    fn default() -> Self {
        Self::UNBOUND
    }
}

/// Opaque value passed through to fired scripts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub enum ScriptValue {
    #[default]
    Void,
    Int(i32),
    Float(f32),
    Str(String),
}

/// Script invocation recorded by the base entity for the VM to drain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedScript {
    pub event: u16,
    pub from: Option<AgentId>,
    pub arg1: ScriptValue,
    pub arg2: ScriptValue,
}

/// Errors raised by compound-agent part and hotspot operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgentError {
    /// A part with this id is already owned by the agent.
    #[error("part id {id} is already taken")]
    DuplicatePartId { id: u32 },
    /// No part with this id exists. May reflect legitimate caller-side
    /// desynchronisation and is safe to catch.
    #[error("no part with id {id}")]
    PartNotFound { id: u32 },
    /// A precondition was violated.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

/// Errors raised by the world driver.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorldError {
    /// The agent handle does not refer to a live agent.
    #[error("unknown agent handle")]
    UnknownAgent,
    #[error(transparent)]
    Agent(#[from] AgentError),
}

/// Key ordering renderer registrations: plane first, then the part's
/// creation sequence number as a stable tiebreak.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct RenderKey {
    pub plane: u32,
    pub sequence: u32,
}

/// One part registration held by the z-order index. The index never
/// owns agent state; the agent and part fields are back-references.
///
/// Ordering is by render key first, so iteration yields draw order;
/// the back-reference fields break ties when agents share a plane and
/// a sequence number.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord,
)]
pub struct RenderEntry {
    pub key: RenderKey,
    pub agent: AgentId,
    pub part: u32,
}

/// Renderer-side draw ordering index.
#[derive(Debug, Default)]
pub struct ZOrderIndex {
    entries: BTreeSet<RenderEntry>,
}

impl ZOrderIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a part. Returns false if the exact registration was
    /// already present.
    pub fn insert(&mut self, entry: RenderEntry) -> bool {
        self.entries.insert(entry)
    }

    /// Remove a registration. Returns false if it was not present.
    pub fn remove(&mut self, entry: &RenderEntry) -> bool {
        self.entries.remove(entry)
    }

    /// Whether any part is registered under `key`.
    #[must_use]
    pub fn contains(&self, key: &RenderKey) -> bool {
        self.entries.iter().any(|entry| entry.key == *key)
    }

    /// Number of registered parts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate registrations in back-to-front draw order.
    pub fn iter(&self) -> impl Iterator<Item = &RenderEntry> {
        self.entries.iter()
    }
}

/// One drawn and ticked sub-object of a compound agent.
///
/// Parts are owned exclusively by exactly one agent; identity is the
/// caller-chosen `id` (0 is reserved for the base part), while the
/// sequence number records creation order for renderer tiebreaks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Part {
    id: u32,
    sprite: SpriteSpec,
    rel_x: i32,
    rel_y: i32,
    z_offset: u32,
    sequence: u32,
    pose: u32,
    animation: Vec<u8>,
    anim_cursor: usize,
    registration: Option<RenderKey>,
}

impl Part {
    /// Construct a part at the agent origin with no plane bias.
    ///
    /// `sequence` should come from the owning agent's
    /// [`CompoundAgent::next_part_sequence_number`] so renderer
    /// tiebreaks stay stable across the agent's lifetime.
    #[must_use]
    pub fn new(id: u32, sprite: SpriteSpec, sequence: u32) -> Self {
        Self {
            id,
            sprite,
            rel_x: 0,
            rel_y: 0,
            z_offset: 0,
            sequence,
            pose: 0,
            animation: Vec::new(),
            anim_cursor: 0,
            registration: None,
        }
    }

    /// Offset the part from the agent origin and bias its plane.
    #[must_use]
    pub fn with_placement(mut self, rel_x: i32, rel_y: i32, z_offset: u32) -> Self {
        self.rel_x = rel_x;
        self.rel_y = rel_y;
        self.z_offset = z_offset;
        self
    }

    /// Install a pose script. `ANIM_LOOP` marks a loop jump; the byte
    /// after it is the restart index, or the script restarts from zero
    /// when the marker is last.
    #[must_use]
    pub fn with_animation(mut self, script: Vec<u8>) -> Self {
        self.animation = script;
        self.anim_cursor = 0;
        self
    }

    /// Part identity within its agent.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Sprite gallery reference.
    #[must_use]
    pub const fn sprite(&self) -> &SpriteSpec {
        &self.sprite
    }

    /// Offset from the agent origin.
    #[must_use]
    pub const fn offset(&self) -> (i32, i32) {
        (self.rel_x, self.rel_y)
    }

    /// Plane bias added to the owning agent's plane.
    #[must_use]
    pub const fn z_offset(&self) -> u32 {
        self.z_offset
    }

    /// Creation-order sequence number.
    #[must_use]
    pub const fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Current pose within the sprite block.
    #[must_use]
    pub const fn pose(&self) -> u32 {
        self.pose
    }

    /// Renderer registration currently held by this part, if any.
    #[must_use]
    pub const fn registration(&self) -> Option<RenderKey> {
        self.registration
    }

    /// Natural ordering key: plane bias first, then id. The part list
    /// of an agent stays sorted by this key after every mutation.
    #[must_use]
    pub const fn order_key(&self) -> (u32, u32) {
        (self.z_offset, self.id)
    }

    /// Advance the pose script by one step.
    ///
    /// A cursor past the end holds the final pose. A loop marker jumps
    /// to its operand index, or to the start when it is the final byte.
    pub fn tick(&mut self) {
        if self.animation.is_empty() || self.anim_cursor >= self.animation.len() {
            return;
        }
        if self.animation[self.anim_cursor] == ANIM_LOOP {
            self.anim_cursor = if self.anim_cursor + 1 == self.animation.len() {
                0
            } else {
                usize::from(self.animation[self.anim_cursor + 1])
            };
        }
        if let Some(&pose) = self.animation.get(self.anim_cursor) {
            self.pose = u32::from(pose);
            self.anim_cursor += 1;
        }
    }

    fn take_registration(&mut self) -> Option<RenderKey> {
        self.registration.take()
    }

    fn set_registration(&mut self, key: RenderKey) {
        self.registration = Some(key);
    }
}

/// Base simulated-entity state embedded in every compound agent:
/// position, plane, pause flag, activation state, the generic click
/// binding, and the fired-script queue the VM drains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCore {
    classifier: Classifier,
    plane: u32,
    /// World-space origin; hotspots are tested relative to this.
    pub position: Position,
    /// Gates part updates only; the base tick always runs.
    pub paused: bool,
    /// Externally managed predicate consulted before any dispatch.
    pub activatable: bool,
    /// Event id of the current activation, or `None` while inactive.
    pub activation: Option<u16>,
    /// Message number installed by the scripting layer for generic
    /// (non-hotspot) clicks.
    pub click_message: Option<u16>,
    age_ticks: u64,
    queued: VecDeque<QueuedScript>,
}

impl AgentCore {
    fn new(classifier: Classifier, plane: u32) -> Self {
        Self {
            classifier,
            plane,
            position: Position::default(),
            paused: false,
            activatable: true,
            activation: None,
            click_message: None,
            age_ticks: 0,
            queued: VecDeque::new(),
        }
    }

    /// Classification triple, immutable after construction.
    #[must_use]
    pub const fn classifier(&self) -> Classifier {
        self.classifier
    }

    /// Current render plane.
    #[must_use]
    pub const fn plane(&self) -> u32 {
        self.plane
    }

    /// Ticks survived since construction.
    #[must_use]
    pub const fn age_ticks(&self) -> u64 {
        self.age_ticks
    }

    /// Scripts queued but not yet drained by the VM.
    #[must_use]
    pub fn queued_scripts(&self) -> impl Iterator<Item = &QueuedScript> {
        self.queued.iter()
    }

    /// Hand every queued script to the caller.
    pub fn drain_scripts(&mut self) -> impl Iterator<Item = QueuedScript> + '_ {
        self.queued.drain(..)
    }

    fn set_plane(&mut self, plane: u32) {
        self.plane = plane;
    }

    /// Base per-tick hook. Runs even while paused.
    fn tick(&mut self) {
        self.age_ticks += 1;
    }

    /// Generic click path used by the modern engine generation.
    fn handle_click(&self, _x: f32, _y: f32) -> Option<u16> {
        self.click_message.map(calculate_script_id)
    }

    /// Generic script-firing mechanism: queue the invocation for the
    /// VM and report it handled.
    fn fire_script(
        &mut self,
        event: u16,
        from: Option<AgentId>,
        arg1: ScriptValue,
        arg2: ScriptValue,
    ) -> bool {
        self.queued.push_back(QueuedScript {
            event,
            from,
            arg1,
            arg2,
        });
        true
    }
}

/// A simulated entity assembled from ordered, independently rendered
/// parts, with six legacy hotspot regions for click-to-script dispatch.
#[derive(Debug)]
pub struct CompoundAgent {
    core: AgentCore,
    sprite: SpriteSpec,
    parts: SlotMap<PartKey, Part>,
    order: SmallVec<[PartKey; 8]>,
    next_part_sequence_number: u32,
    hotspots: [Hotspot; HOTSPOT_SLOTS],
    hotspot_functions: [HotspotFunction; HOTSPOT_SLOTS],
}

impl CompoundAgent {
    /// Build a classified agent, auto-creating the base part (id 0)
    /// from the supplied sprite data.
    pub fn with_classification(
        classifier: Classifier,
        plane: u32,
        sprite: SpriteSpec,
    ) -> Result<Self, AgentError> {
        let mut agent = Self::bare(classifier, plane, sprite.clone());
        let sequence = agent.next_part_sequence_number();
        agent.add_part(Part::new(0, sprite, sequence))?;
        Ok(agent)
    }

    /// Build an appearance-only agent: zero classification, no parts.
    /// Part creation is entirely up to the caller.
    #[must_use]
    pub fn from_sprite(sprite: SpriteSpec, plane: u32) -> Self {
        Self::bare(Classifier::unclassified(), plane, sprite)
    }

    fn bare(classifier: Classifier, plane: u32, sprite: SpriteSpec) -> Self {
        Self {
            core: AgentCore::new(classifier, plane),
            sprite,
            parts: SlotMap::with_key(),
            order: SmallVec::new(),
            next_part_sequence_number: 0,
            hotspots: [Hotspot::UNSET; HOTSPOT_SLOTS],
            hotspot_functions: [HotspotFunction::UNBOUND; HOTSPOT_SLOTS],
        }
    }

    /// Base entity state.
    #[must_use]
    pub fn core(&self) -> &AgentCore {
        &self.core
    }

    /// Mutable base entity state.
    #[must_use]
    pub fn core_mut(&mut self) -> &mut AgentCore {
        &mut self.core
    }

    /// Appearance metadata supplied at construction.
    #[must_use]
    pub fn sprite(&self) -> &SpriteSpec {
        &self.sprite
    }

    /// Number of owned parts.
    #[must_use]
    pub fn part_count(&self) -> usize {
        self.order.len()
    }

    /// Iterate parts in sorted (render/update) order.
    pub fn parts(&self) -> impl Iterator<Item = &Part> {
        self.order.iter().map(|&key| &self.parts[key])
    }

    /// Take ownership of a part. Fails with
    /// [`AgentError::DuplicatePartId`] if the id is already present;
    /// the collection is left untouched in that case. On success the
    /// part list is re-sorted by each part's ordering key.
    pub fn add_part(&mut self, part: Part) -> Result<PartKey, AgentError> {
        if self.part(part.id()).is_some() {
            return Err(AgentError::DuplicatePartId { id: part.id() });
        }
        let key = self.parts.insert(part);
        self.order.push(key);
        let parts = &self.parts;
        self.order
            .sort_unstable_by(|&a, &b| parts[a].order_key().cmp(&parts[b].order_key()));
        Ok(key)
    }

    /// Destroy the part with the given id. The base part (id 0) is
    /// only removable by destroying the whole agent; the relative
    /// order of surviving parts is unchanged.
    pub fn del_part(&mut self, id: u32) -> Result<(), AgentError> {
        if id == 0 {
            return Err(AgentError::InvalidArgument("part 0 cannot be removed"));
        }
        let position = self
            .order
            .iter()
            .position(|&key| self.parts[key].id() == id)
            .ok_or(AgentError::PartNotFound { id })?;
        let key = self.order.remove(position);
        self.parts.remove(key);
        Ok(())
    }

    /// Linear lookup by part id. Absence is not an error.
    #[must_use]
    pub fn part(&self, id: u32) -> Option<&Part> {
        self.order
            .iter()
            .map(|&key| &self.parts[key])
            .find(|part| part.id() == id)
    }

    /// Mutable linear lookup by part id.
    pub fn part_mut(&mut self, id: u32) -> Option<&mut Part> {
        let key = self
            .order
            .iter()
            .copied()
            .find(|&key| self.parts[key].id() == id)?;
        self.parts.get_mut(key)
    }

    /// Hand out the next creation-order sequence number. Strictly
    /// increasing across the agent's lifetime, never reused.
    pub fn next_part_sequence_number(&mut self) -> u32 {
        let sequence = self.next_part_sequence_number;
        self.next_part_sequence_number += 1;
        sequence
    }

    /// Hotspot rectangle for slot `id`.
    #[must_use]
    pub fn hotspot(&self, id: usize) -> Option<&Hotspot> {
        self.hotspots.get(id)
    }

    /// Hotspot-function binding for slot `id`.
    #[must_use]
    pub fn hotspot_function(&self, id: usize) -> Option<&HotspotFunction> {
        self.hotspot_functions.get(id)
    }

    /// Store a hotspot rectangle verbatim. No normalisation: callers
    /// supply `left <= right` and `top <= bottom` themselves.
    pub fn set_hotspot_loc(
        &mut self,
        id: usize,
        left: i32,
        top: i32,
        right: i32,
        bottom: i32,
    ) -> Result<(), AgentError> {
        let slot = self
            .hotspots
            .get_mut(id)
            .ok_or(AgentError::InvalidArgument("hotspot id out of range"))?;
        *slot = Hotspot::new(left, top, right, bottom);
        Ok(())
    }

    /// Bind slot `id` to hotspot index `hotspot`, opening the mask to
    /// all sources and deriving the message from the slot number.
    /// Slots 3..6 mirror 0..3, so slot 5 derives the same message as
    /// slot 2.
    pub fn set_hotspot_func(&mut self, id: usize, hotspot: i8) -> Result<(), AgentError> {
        let slot = self
            .hotspot_functions
            .get_mut(id)
            .ok_or(AgentError::InvalidArgument("hotspot function id out of range"))?;
        slot.hotspot = hotspot;
        slot.mask = MASK_ALL;
        slot.message = if id < CREATURE_SLOTS {
            calculate_script_id(id as u16)
        } else {
            calculate_script_id((id - CREATURE_SLOTS) as u16)
        };
        Ok(())
    }

    /// Overwrite a binding's message and mask directly, bypassing the
    /// slot-number derivation of [`Self::set_hotspot_func`].
    pub fn set_hotspot_func_details(
        &mut self,
        id: usize,
        message: u16,
        mask: u8,
    ) -> Result<(), AgentError> {
        let slot = self
            .hotspot_functions
            .get_mut(id)
            .ok_or(AgentError::InvalidArgument("hotspot function id out of range"))?;
        slot.message = message;
        slot.mask = mask;
        Ok(())
    }

    /// Move the agent to a new render plane and refresh every part's
    /// renderer registration.
    ///
    /// The sweep is two-phase: all registrations are detached before
    /// any is re-attached. Interleaving the two would let transiently
    /// colliding keys shadow each other in the index while the parent
    /// plane changes under them.
    pub fn set_zorder(&mut self, plane: u32, slot: AgentId, index: &mut ZOrderIndex) {
        self.core.set_plane(plane);
        self.detach_parts(slot, index);
        self.attach_parts(slot, index);
    }

    /// Advance every part (in sorted order) unless paused, then run
    /// the base tick unconditionally.
    pub fn tick(&mut self) {
        if !self.core.paused {
            for &key in &self.order {
                self.parts[key].tick();
            }
        }
        self.core.tick();
    }

    /// Legacy hotspot click dispatch.
    ///
    /// Returns the script id to fire, or `None` when nothing matched.
    /// The scan is first-match-in-slot-order; this is a compatibility
    /// contract with the legacy engines, not a nearest-hit test.
    #[must_use]
    pub fn handle_click(&self, version: EngineVersion, x: f32, y: f32) -> Option<u16> {
        if !self.core.activatable {
            return None;
        }
        if !version.is_legacy() {
            return self.core.handle_click(x, y);
        }

        // Hotspots are relative to the agent origin.
        let local_x = x - self.core.position.x;
        let local_y = y - self.core.position.y;

        let start = if version == EngineVersion::V1 {
            // V1 reserves slots 0..3 for creature interaction points.
            CREATURE_SLOTS
        } else {
            0
        };
        for slot in start..HOTSPOT_SLOTS {
            let binding = &self.hotspot_functions[slot];
            if binding.hotspot < 0 || binding.hotspot >= HOTSPOT_SLOTS as i8 {
                continue;
            }
            let script = if version == EngineVersion::V1 {
                // V1 ignores the stored binding and derives the script
                // purely from the slot offset.
                calculate_script_id((slot - CREATURE_SLOTS) as u16)
            } else {
                if binding.mask == MASK_CREATURE {
                    continue;
                }
                calculate_script_id(binding.message)
            };
            let hotspot = &self.hotspots[binding.hotspot as usize];
            if hotspot.is_unset() {
                continue;
            }
            if hotspot.contains(local_x, local_y) {
                return Some(script);
            }
        }

        None
    }

    /// Fire a script through the base entity, suppressing the legacy
    /// reentrant-activation case: pre-modern engines must not re-run
    /// the activation script of an already active agent.
    pub fn fire_script(
        &mut self,
        version: EngineVersion,
        event: u16,
        from: Option<AgentId>,
        arg1: ScriptValue,
        arg2: ScriptValue,
    ) -> bool {
        if version.is_legacy() && self.core.activation == Some(event) {
            return false;
        }
        self.core.fire_script(event, from, arg1, arg2)
    }

    fn render_key(&self, key: PartKey) -> RenderKey {
        let part = &self.parts[key];
        RenderKey {
            plane: self.core.plane.saturating_add(part.z_offset()),
            sequence: part.sequence(),
        }
    }

    fn detach_parts(&mut self, slot: AgentId, index: &mut ZOrderIndex) {
        for position in 0..self.order.len() {
            let key = self.order[position];
            self.detach_part(key, slot, index);
        }
    }

    fn attach_parts(&mut self, slot: AgentId, index: &mut ZOrderIndex) {
        for position in 0..self.order.len() {
            let key = self.order[position];
            self.attach_part(key, slot, index);
        }
    }

    fn attach_part(&mut self, key: PartKey, slot: AgentId, index: &mut ZOrderIndex) {
        let render_key = self.render_key(key);
        let part = &mut self.parts[key];
        part.set_registration(render_key);
        index.insert(RenderEntry {
            key: render_key,
            agent: slot,
            part: part.id(),
        });
    }

    fn detach_part(&mut self, key: PartKey, slot: AgentId, index: &mut ZOrderIndex) {
        let part = &mut self.parts[key];
        let part_id = part.id();
        if let Some(registration) = part.take_registration() {
            index.remove(&RenderEntry {
                key: registration,
                agent: slot,
                part: part_id,
            });
        }
    }

    fn find_key(&self, id: u32) -> Option<PartKey> {
        self.order
            .iter()
            .copied()
            .find(|&key| self.parts[key].id() == id)
    }
}

/// Static engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Engine generation being emulated.
    pub version: EngineVersion,
    /// Plane assigned to appearance-only agents at spawn.
    pub default_plane: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: EngineVersion::V3,
            default_plane: 500,
        }
    }
}

/// Serializable view of a single part.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartSnapshot {
    pub id: u32,
    pub pose: u32,
    pub sequence: u32,
    pub z_offset: u32,
}

/// Serializable view of a compound agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub classifier: Classifier,
    pub position: Position,
    pub plane: u32,
    pub paused: bool,
    pub parts: Vec<PartSnapshot>,
    pub hotspots: [Hotspot; HOTSPOT_SLOTS],
}

/// Serializable view of the whole world.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorldSnapshot {
    pub tick: Tick,
    pub version: EngineVersion,
    pub agents: Vec<AgentSnapshot>,
}

/// Single-threaded simulation driver owning every compound agent and
/// the shared renderer ordering index.
///
/// All mutation goes through the driver so part registrations in the
/// z-order index stay in sync with the part collections.
#[derive(Debug, Default)]
pub struct World {
    config: EngineConfig,
    tick: Tick,
    agents: SlotMap<AgentId, CompoundAgent>,
    zorder: ZOrderIndex,
}

impl World {
    /// Create an empty world.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            tick: Tick::zero(),
            agents: SlotMap::with_key(),
            zorder: ZOrderIndex::new(),
        }
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current simulation clock.
    #[must_use]
    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// Number of live agents.
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Renderer ordering index (read-only; the driver keeps it
    /// synchronised).
    #[must_use]
    pub fn zorder(&self) -> &ZOrderIndex {
        &self.zorder
    }

    /// Borrow an agent.
    #[must_use]
    pub fn agent(&self, id: AgentId) -> Option<&CompoundAgent> {
        self.agents.get(id)
    }

    /// Mutably borrow an agent. Part mutation should go through
    /// [`Self::add_part`]/[`Self::del_part`] so registrations stay
    /// consistent.
    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut CompoundAgent> {
        self.agents.get_mut(id)
    }

    /// Iterate live agent handles.
    pub fn iter_agents(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.agents.keys()
    }

    /// Insert an agent, registering every part with the renderer.
    pub fn spawn(&mut self, agent: CompoundAgent) -> AgentId {
        let id = self.agents.insert(agent);
        let agent = &mut self.agents[id];
        agent.attach_parts(id, &mut self.zorder);
        id
    }

    /// Build and insert an appearance-only agent on the configured
    /// default plane.
    pub fn spawn_from_sprite(&mut self, sprite: SpriteSpec) -> AgentId {
        self.spawn(CompoundAgent::from_sprite(sprite, self.config.default_plane))
    }

    /// Remove an agent, dropping it and all its parts after clearing
    /// their renderer registrations.
    pub fn remove(&mut self, id: AgentId) -> Option<CompoundAgent> {
        let agent = self.agents.get_mut(id)?;
        agent.detach_parts(id, &mut self.zorder);
        self.agents.remove(id)
    }

    /// Add a part to an agent and register it with the renderer.
    pub fn add_part(&mut self, id: AgentId, part: Part) -> Result<(), WorldError> {
        let agent = self.agents.get_mut(id).ok_or(WorldError::UnknownAgent)?;
        let key = agent.add_part(part)?;
        agent.attach_part(key, id, &mut self.zorder);
        Ok(())
    }

    /// Remove a part from an agent, deregistering it first.
    pub fn del_part(&mut self, id: AgentId, part_id: u32) -> Result<(), WorldError> {
        let agent = self.agents.get_mut(id).ok_or(WorldError::UnknownAgent)?;
        if part_id == 0 {
            return Err(AgentError::InvalidArgument("part 0 cannot be removed").into());
        }
        let key = agent
            .find_key(part_id)
            .ok_or(AgentError::PartNotFound { id: part_id })?;
        agent.detach_part(key, id, &mut self.zorder);
        agent.del_part(part_id)?;
        Ok(())
    }

    /// Move an agent to a new plane (two-phase registration sweep).
    pub fn set_plane(&mut self, id: AgentId, plane: u32) -> Result<(), WorldError> {
        let agent = self.agents.get_mut(id).ok_or(WorldError::UnknownAgent)?;
        agent.set_zorder(plane, id, &mut self.zorder);
        Ok(())
    }

    /// Dispatch a click against one agent under the configured engine
    /// version.
    pub fn handle_click(&self, id: AgentId, x: f32, y: f32) -> Result<Option<u16>, WorldError> {
        let agent = self.agents.get(id).ok_or(WorldError::UnknownAgent)?;
        Ok(agent.handle_click(self.config.version, x, y))
    }

    /// Fire a script against one agent under the configured engine
    /// version.
    pub fn fire_script(
        &mut self,
        id: AgentId,
        event: u16,
        from: Option<AgentId>,
        arg1: ScriptValue,
        arg2: ScriptValue,
    ) -> Result<bool, WorldError> {
        let agent = self.agents.get_mut(id).ok_or(WorldError::UnknownAgent)?;
        Ok(agent.fire_script(self.config.version, event, from, arg1, arg2))
    }

    /// Advance every agent one tick, then the world clock.
    pub fn step(&mut self) -> Tick {
        for (_, agent) in &mut self.agents {
            agent.tick();
        }
        self.tick = self.tick.next();
        self.tick
    }

    /// Collect every queued script, tagged with its owning agent.
    pub fn drain_fired(&mut self) -> Vec<(AgentId, QueuedScript)> {
        let mut fired = Vec::new();
        for (id, agent) in &mut self.agents {
            fired.extend(agent.core_mut().drain_scripts().map(|script| (id, script)));
        }
        fired
    }

    /// Serializable view of one agent.
    #[must_use]
    pub fn snapshot_agent(&self, id: AgentId) -> Option<AgentSnapshot> {
        let agent = self.agents.get(id)?;
        Some(AgentSnapshot {
            id,
            classifier: agent.core().classifier(),
            position: agent.core().position,
            plane: agent.core().plane(),
            paused: agent.core().paused,
            parts: agent
                .parts()
                .map(|part| PartSnapshot {
                    id: part.id(),
                    pose: part.pose(),
                    sequence: part.sequence(),
                    z_offset: part.z_offset(),
                })
                .collect(),
            hotspots: agent.hotspots,
        })
    }

    /// Serializable view of the whole world, agents in handle order.
    #[must_use]
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            tick: self.tick,
            version: self.config.version,
            agents: self
                .agents
                .keys()
                .filter_map(|id| self.snapshot_agent(id))
                .collect(),
        }
    }
}
