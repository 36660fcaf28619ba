//! Edit sessions over one tag at a time.
//!
//! [`WeightHelper`] owns the registry, the ledger and the caches. Opening a
//! context on a tag moves the editor into an [`EditContext`]; every accepted
//! [`Edit`] re-derives the preset name, the encoded tag and the lock status.
//! Closing or cancelling hands the editor back.

use std::ops::Range;

use thiserror::Error;
use tracing::{debug, info, warn};
use weight_helper_core::{
    locate_tag, BlockRegistry, BlockType, ControlTable, HistoryEntry, HostOptions, Ledger, ModelFamily,
    ScalarKey, Tag, TagType, WeightCodec, WeightState, DEFAULT_SAMPLING_STEPS,
};

use crate::cache::{EntityCache, MetadataEntry};
use crate::editor::EditorBuffer;
use crate::fetch::{BlockRestriction, FetchError, FetchKind, FetchTicket, Metadata, Preview};
use crate::store::{load_ledger, save_ledger, KeyValueStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Closed,
    /// Open, with a metadata request outstanding. Edits are refused.
    Waiting,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpenError {
    #[error("weight helper is disabled")]
    Disabled,
    #[error("an edit context is already open")]
    AlreadyOpen,
    #[error("no weight tag at the cursor")]
    NoTag,
}

/// A refused [`WeightHelper::open`]. The editor is handed back untouched.
#[derive(Debug)]
pub struct OpenRejected<E> {
    pub editor: E,
    pub reason: OpenError,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EditRejected {
    #[error("no edit context is open")]
    Closed,
    #[error("waiting for model metadata")]
    Waiting,
    #[error("{0} is not a finite number")]
    NotFinite(f64),
    #[error("`{0}` has no enabled flag")]
    NotOptional(ScalarKey),
    #[error("block `{0}` is not part of the current layout")]
    UnknownBlock(String),
    #[error("block `{0}` is not used by this model")]
    RestrictedBlock(String),
    #[error("unknown preset `{0}`")]
    UnknownPreset(String),
    #[error("no history to navigate")]
    NoHistory,
}

/// One user action on an open context.
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    Scalar { key: ScalarKey, value: f64 },
    /// Checkbox of an optional scalar.
    ScalarEnabled { key: ScalarKey, enabled: bool },
    Block { label: String, value: f64 },
    ModelFamily(ModelFamily),
    BlockType(BlockType),
    /// Loads a preset's values into the blocks. An empty name re-applies the
    /// preset currently matched.
    ApplyPreset(String),
    ToggleXyz,
    ToggleLock,
    PreviousHistory,
    NextHistory,
    ClearHistory,
}

/// State of the tag being edited.
#[derive(Debug)]
pub struct EditContext<E> {
    editor: E,
    span: Range<usize>,
    tag_type: TagType,
    name: String,
    original_text: String,
    src_params: String,
    tag_text: String,
    state: WeightState,
    preset: Option<String>,
    locked: bool,
    history_index: usize,
    restriction: BlockRestriction,
    metadata: Option<Metadata>,
    preview: Option<Preview>,
    waiting: bool,
    generation: u64,
    /// Generation of the one metadata request that may still be answered.
    metadata_generation: u64,
}

impl<E: EditorBuffer> EditContext<E> {
    pub fn editor(&self) -> &E {
        &self.editor
    }

    /// Byte range of the tag in the editor.
    pub fn span(&self) -> Range<usize> {
        self.span.clone()
    }

    pub fn tag_type(&self) -> TagType {
        self.tag_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &WeightState {
        &self.state
    }

    /// Tag text for the current state, preset names substituted.
    pub fn tag_text(&self) -> &str {
        &self.tag_text
    }

    pub fn preset(&self) -> Option<&str> {
        self.preset.as_deref()
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    pub fn history_index(&self) -> usize {
        self.history_index
    }

    pub fn restriction(&self) -> &BlockRestriction {
        &self.restriction
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub fn preview(&self) -> Option<&Preview> {
        self.preview.as_ref()
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    fn write(&mut self, text: &str) {
        self.editor.replace(self.span.clone(), text);
        self.span = self.span.start..self.span.start + text.len();
    }

    fn accepts(&self, ticket: &FetchTicket, kind: FetchKind) -> bool {
        let generation = match kind {
            FetchKind::Metadata => self.metadata_generation,
            FetchKind::Preview => self.generation,
        };
        ticket.kind == kind && ticket.generation == generation && ticket.entity == self.name
    }
}

fn finite(value: f64) -> Result<f64, EditRejected> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EditRejected::NotFinite(value))
    }
}

fn current_preset(registry: &BlockRegistry, state: &WeightState) -> Option<String> {
    if state.xyz || state.blocks().is_empty() {
        return None;
    }
    registry
        .match_preset(state.family, state.block_type, &state.joined_blocks())
        .map(str::to_string)
}

/// Refreshes preset, tag text and lock status after a state change, writing
/// the tag into the editor when `write` is set.
fn reconcile<E: EditorBuffer>(codec: &WeightCodec<'_>, ledger: &Ledger, write: bool, ctx: &mut EditContext<E>) {
    ctx.preset = current_preset(codec.registry(), &ctx.state);
    let encoded = codec.encode(&ctx.state);
    let tag = Tag::new(ctx.tag_type, ctx.name.as_str(), encoded.body).to_string();
    if write {
        ctx.write(&tag);
    }
    ctx.tag_text = tag;
    ctx.locked = ledger.is_locked(&ctx.name, &encoded.params);
}

/// Moves the history cursor one entry and loads that entry's configuration,
/// decoded against the layout it was recorded with.
fn step_history<E: EditorBuffer>(
    codec: &WeightCodec<'_>,
    ledger: &Ledger,
    ctx: &mut EditContext<E>,
    forward: bool,
) -> Result<(), EditRejected> {
    let histories = ledger.histories(&ctx.name);
    let Some(last) = histories.len().checked_sub(1) else {
        return Err(EditRejected::NoHistory);
    };
    let index = if forward {
        (ctx.history_index + 1).min(last)
    } else {
        ctx.history_index.min(last).saturating_sub(1)
    };
    let entry = &histories[index];
    let mut state = codec.parse(&entry.params, entry.model_family, entry.block_type);
    if state.block_type == BlockType::Unknown {
        let family = state.family;
        state.retarget(family, ctx.tag_type.fallback_block_type(), codec.controls().block());
    }
    ctx.state = state;
    ctx.history_index = index;
    Ok(())
}

fn history_entry(params: String, state: &WeightState) -> HistoryEntry {
    HistoryEntry::new(params, state.family, state.block_type)
}

/// Session driver. One context may be open at a time.
pub struct WeightHelper<E> {
    options: HostOptions,
    registry: BlockRegistry,
    controls: ControlTable,
    ledger: Ledger,
    metadata_cache: EntityCache<MetadataEntry>,
    preview_cache: EntityCache<Preview>,
    store: Option<Box<dyn KeyValueStore>>,
    generation: u64,
    context: Option<EditContext<E>>,
}

impl<E: EditorBuffer> WeightHelper<E> {
    pub fn new(options: HostOptions) -> Self {
        Self {
            registry: BlockRegistry::new(&options),
            controls: ControlTable::from_options(&options, DEFAULT_SAMPLING_STEPS),
            options,
            ledger: Ledger::new(),
            metadata_cache: EntityCache::new(),
            preview_cache: EntityCache::new(),
            store: None,
            generation: 0,
            context: None,
        }
    }

    /// Attaches a store and merges the ledger it holds. A store that cannot be
    /// read is still attached; the failure is logged.
    pub fn with_store(mut self, store: Box<dyn KeyValueStore>) -> Self {
        if let Err(e) = load_ledger(store.as_ref(), &mut self.ledger) {
            warn!(error = %e, "failed to load history ledger");
        }
        self.store = Some(store);
        self
    }

    pub fn options(&self) -> &HostOptions {
        &self.options
    }

    pub fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    pub fn controls(&self) -> &ControlTable {
        &self.controls
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn context(&self) -> Option<&EditContext<E>> {
        self.context.as_ref()
    }

    pub fn phase(&self) -> Phase {
        match &self.context {
            None => Phase::Closed,
            Some(ctx) if ctx.waiting => Phase::Waiting,
            Some(_) => Phase::Ready,
        }
    }

    /// Display groups of the open context's layout.
    pub fn groups(&self) -> Vec<Vec<String>> {
        self.context.as_ref().map_or_else(Vec::new, |ctx| {
            self.registry.groups(ctx.state.family, ctx.state.block_type)
        })
    }

    pub fn preset_names(&self) -> Vec<&str> {
        self.context.as_ref().map_or_else(Vec::new, |ctx| {
            self.registry
                .presets(ctx.state.family, ctx.state.block_type)
                .names()
                .collect()
        })
    }

    pub fn xyz_label(&self) -> Option<&'static str> {
        let ctx = self.context.as_ref()?;
        Some(self.registry.xyz_label(ctx.state.family, ctx.state.block_type))
    }

    /// Whether a block edit on `label` would be accepted right now.
    pub fn is_block_editable(&self, label: &str) -> bool {
        self.context.as_ref().is_some_and(|ctx| {
            !ctx.waiting && ctx.state.block(label).is_some() && ctx.restriction.allows(label)
        })
    }

    /// Opens a context on the tag around `cursor`.
    ///
    /// `steps` is the host's current sampling step count. Returns the fetches
    /// the host should perform: metadata unless cached, preview unless cached.
    /// The context waits for metadata only when neither the tag nor the
    /// entity's history or cache resolves a model family.
    pub fn open(&mut self, editor: E, cursor: usize, steps: u32) -> Result<Vec<FetchTicket>, OpenRejected<E>> {
        if !self.options.enabled {
            return Err(OpenRejected {
                editor,
                reason: OpenError::Disabled,
            });
        }
        if self.context.is_some() {
            return Err(OpenRejected {
                editor,
                reason: OpenError::AlreadyOpen,
            });
        }
        let Some(found) = locate_tag(editor.text(), cursor) else {
            return Err(OpenRejected {
                editor,
                reason: OpenError::NoTag,
            });
        };

        self.generation += 1;
        self.controls = self.controls.with_steps(steps);
        let name = found.tag.name.clone();

        let (mut family, mut block_type) = self
            .ledger
            .latest(&name)
            .map_or((ModelFamily::Unknown, BlockType::Unknown), |e| (e.model_family, e.block_type));
        let cached = self.metadata_cache.get(&name).cloned();
        if let Some(entry) = &cached {
            family = entry.family;
            block_type = entry.block_type;
        }

        let codec = WeightCodec::new(&self.registry, &self.controls);
        let decoded = codec.decode(&found.tag.body, family, block_type);
        let mut state = decoded.state;
        if state.block_type == BlockType::Unknown {
            let fallback = found.tag.tag_type.fallback_block_type();
            state.retarget(state.family, fallback, self.controls.block());
        }
        let encoded = codec.encode(&state);

        let (metadata, restriction) = match cached {
            Some(entry) => (entry.metadata, entry.restriction),
            None => (None, BlockRestriction::Unrestricted),
        };
        let preview = self.preview_cache.get(&name).cloned();
        let waiting = metadata.is_none() && state.family == ModelFamily::Unknown;

        let mut tickets = Vec::new();
        if metadata.is_none() {
            tickets.push(FetchTicket {
                kind: FetchKind::Metadata,
                entity: name.clone(),
                force: false,
                generation: self.generation,
            });
        }
        if preview.is_none() {
            tickets.push(FetchTicket {
                kind: FetchKind::Preview,
                entity: name.clone(),
                force: false,
                generation: self.generation,
            });
        }

        let original_text = editor.text()[found.start..found.end].to_string();
        let tag_text = Tag::new(found.tag.tag_type, name.as_str(), encoded.body).to_string();
        info!(
            entity = %name,
            family = %state.family,
            block_type = %state.block_type,
            issues = decoded.issues.len(),
            waiting,
            "edit context opened"
        );
        self.context = Some(EditContext {
            editor,
            span: found.start..found.end,
            tag_type: found.tag.tag_type,
            history_index: self.ledger.histories(&name).len().saturating_sub(1),
            locked: self.ledger.is_locked(&name, &encoded.params),
            preset: current_preset(&self.registry, &state),
            name,
            original_text,
            src_params: encoded.params,
            tag_text,
            state,
            restriction,
            metadata,
            preview,
            waiting,
            generation: self.generation,
            metadata_generation: self.generation,
        });
        Ok(tickets)
    }

    /// Applies one edit and reconciles the context.
    pub fn apply(&mut self, edit: Edit) -> Result<(), EditRejected> {
        let live = !self.options.using_exec_command;
        let ctx = self.context.as_mut().ok_or(EditRejected::Closed)?;
        if ctx.waiting {
            return Err(EditRejected::Waiting);
        }
        let codec = WeightCodec::new(&self.registry, &self.controls);
        let block_cfg = *self.controls.block();

        match edit {
            Edit::Scalar { key, value } => {
                let value = finite(value)?;
                let control = ctx.state.scalar_mut(key);
                control.set_value(value);
                if key.is_optional() && control.enabled.is_some() {
                    control.enabled = Some(true);
                }
                ctx.state.xyz = false;
            }
            Edit::ScalarEnabled { key, enabled } => {
                if !key.is_optional() {
                    return Err(EditRejected::NotOptional(key));
                }
                ctx.state.scalar_mut(key).enabled = Some(enabled);
                ctx.state.xyz = false;
            }
            Edit::Block { label, value } => {
                let value = finite(value)?;
                if ctx.state.block(&label).is_none() {
                    return Err(EditRejected::UnknownBlock(label));
                }
                if !ctx.restriction.allows(&label) {
                    return Err(EditRejected::RestrictedBlock(label));
                }
                if let Some(control) = ctx.state.block_mut(&label) {
                    control.set_value(value);
                }
                ctx.state.xyz = false;
            }
            Edit::ModelFamily(family) => {
                let block_type = ctx.state.block_type;
                ctx.state.retarget(family, block_type, &block_cfg);
            }
            Edit::BlockType(block_type) => {
                let family = ctx.state.family;
                ctx.state.retarget(family, block_type, &block_cfg);
            }
            Edit::ApplyPreset(name) => {
                let name = if name.is_empty() {
                    ctx.preset.clone().ok_or(EditRejected::UnknownPreset(name))?
                } else {
                    name
                };
                let values = self
                    .registry
                    .presets(ctx.state.family, ctx.state.block_type)
                    .values(&name)
                    .filter(|values| values.len() == ctx.state.blocks().len());
                let Some(values) = values else {
                    return Err(EditRejected::UnknownPreset(name));
                };
                ctx.state.set_block_values(&values);
                ctx.state.xyz = false;
            }
            Edit::ToggleXyz => ctx.state.xyz = !ctx.state.xyz,
            Edit::ToggleLock => {
                let params = codec.encode(&ctx.state).params;
                if self.ledger.is_locked(&ctx.name, &params) {
                    self.ledger.remove_lock(&ctx.name, &params);
                } else {
                    self.ledger.add_lock(&ctx.name, &params);
                }
            }
            Edit::PreviousHistory => step_history(&codec, &self.ledger, ctx, false)?,
            Edit::NextHistory => step_history(&codec, &self.ledger, ctx, true)?,
            Edit::ClearHistory => {
                self.ledger.clear_histories(&ctx.name);
                if !ctx.state.xyz {
                    let params = codec.encode(&ctx.state).params;
                    self.ledger.add_history(&ctx.name, history_entry(params, &ctx.state));
                }
                ctx.history_index = self.ledger.histories(&ctx.name).len().saturating_sub(1);
            }
        }

        reconcile(&codec, &self.ledger, live, ctx);
        Ok(())
    }

    /// Asks for fresh metadata for the open context, bypassing caches.
    ///
    /// Any metadata request still in flight is superseded; its result will be
    /// dropped.
    pub fn refresh_metadata(&mut self) -> Option<FetchTicket> {
        let ctx = self.context.as_mut()?;
        self.generation += 1;
        ctx.metadata_generation = self.generation;
        ctx.waiting = ctx.state.family == ModelFamily::Unknown;
        Some(FetchTicket {
            kind: FetchKind::Metadata,
            entity: ctx.name.clone(),
            force: true,
            generation: ctx.metadata_generation,
        })
    }

    /// Feeds a metadata result back. Returns `false` when the ticket is stale
    /// and the result was dropped.
    pub fn metadata_arrived(&mut self, ticket: &FetchTicket, metadata: Metadata) -> bool {
        let Some(ctx) = self
            .context
            .as_mut()
            .filter(|ctx| ctx.accepts(ticket, FetchKind::Metadata))
        else {
            debug!(entity = %ticket.entity, generation = ticket.generation, "stale metadata dropped");
            return false;
        };

        let family = match ctx.state.family {
            ModelFamily::Unknown => metadata.model_family,
            known => known,
        };
        let block_type = ctx.state.block_type;
        ctx.state.retarget(family, block_type, self.controls.block());
        ctx.restriction = metadata.using_blocks.clone();
        ctx.metadata = Some(metadata);
        ctx.waiting = false;

        let codec = WeightCodec::new(&self.registry, &self.controls);
        if !ctx.state.xyz {
            let params = codec.encode(&ctx.state).params;
            self.ledger.add_history(&ctx.name, history_entry(params, &ctx.state));
            ctx.history_index = self.ledger.histories(&ctx.name).len().saturating_sub(1);
        }
        reconcile(&codec, &self.ledger, false, ctx);
        debug!(entity = %ctx.name, family = %ctx.state.family, "metadata applied");
        true
    }

    pub fn preview_arrived(&mut self, ticket: &FetchTicket, preview: Preview) -> bool {
        let Some(ctx) = self
            .context
            .as_mut()
            .filter(|ctx| ctx.accepts(ticket, FetchKind::Preview))
        else {
            debug!(entity = %ticket.entity, generation = ticket.generation, "stale preview dropped");
            return false;
        };
        self.preview_cache.insert(&ctx.name, preview.clone());
        ctx.preview = Some(preview);
        true
    }

    /// Reports a failed fetch. Cancellation is ignored; any other failure of
    /// the metadata request ends the waiting state.
    pub fn fetch_failed(&mut self, ticket: &FetchTicket, error: FetchError) -> bool {
        let Some(ctx) = self
            .context
            .as_mut()
            .filter(|ctx| ctx.accepts(ticket, ticket.kind))
        else {
            return false;
        };
        if error == FetchError::Cancelled {
            return true;
        }
        warn!(entity = %ctx.name, kind = ?ticket.kind, error = %error, "fetch failed");
        if ticket.kind == FetchKind::Metadata {
            ctx.waiting = false;
        }
        true
    }

    /// Commits the context and returns the editor.
    ///
    /// In deferred insertion mode the tag is written here, and only when the
    /// configuration changed since open.
    pub fn close(&mut self) -> Option<E> {
        self.finish(false)
    }

    /// Abandons the context and returns the editor. In live insertion mode
    /// the original tag text is restored.
    pub fn cancel(&mut self) -> Option<E> {
        self.finish(true)
    }

    fn finish(&mut self, cancelled: bool) -> Option<E> {
        let mut ctx = self.context.take()?;
        self.generation += 1;
        let live = !self.options.using_exec_command;
        let codec = WeightCodec::new(&self.registry, &self.controls);
        let encoded = codec.encode(&ctx.state);

        if cancelled {
            if live {
                let original = std::mem::take(&mut ctx.original_text);
                ctx.write(&original);
            }
        } else if !live && encoded.params != ctx.src_params {
            let tag = Tag::new(ctx.tag_type, ctx.name.as_str(), encoded.body).to_string();
            ctx.write(&tag);
        }

        self.metadata_cache.insert(
            &ctx.name,
            MetadataEntry {
                metadata: ctx.metadata.take(),
                family: ctx.state.family,
                block_type: ctx.state.block_type,
                restriction: std::mem::take(&mut ctx.restriction),
            },
        );
        if !ctx.state.xyz {
            self.ledger.add_history(&ctx.name, history_entry(encoded.params, &ctx.state));
        }
        self.persist();
        info!(entity = %ctx.name, cancelled, "edit context closed");
        Some(ctx.editor)
    }

    fn persist(&mut self) {
        let Some(store) = self.store.as_mut() else {
            return;
        };
        if let Err(e) = save_ledger(store.as_mut(), &self.ledger) {
            warn!(error = %e, "failed to persist history ledger");
        }
    }
}
