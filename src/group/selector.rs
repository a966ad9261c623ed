//! Selector group
//!
//! A `Selector` is an outbound that forwards everything to one member chosen
//! from a candidate set. Candidates come from a static tag list followed by
//! the outbounds of bound providers (optionally filtered by include/exclude
//! patterns). The active member is chosen explicitly through
//! [`Selector::select_outbound`] or automatically after start and after each
//! provider update, persisted through the [`SelectionStore`], and read
//! lock-free on every connection.
//!
//! # Locking
//!
//! All writes to the candidate set, provider cache and bindings happen under
//! one mutex. The active member lives in an `ArcSwapOption` so the dial path
//! never takes that mutex.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::config::{SelectorConfig, COMPATIBLE_OUTBOUND_TAG};
use crate::connection::{ConnectionManager, CopyResult, InboundContext, OutboundStats};
use crate::error::{ConnectionError, OutboundError, SelectorError};
use crate::interrupt::InterruptGroup;
use crate::outbound::{
    real_tag, BoxedStream, ConnectionHandler, ConnectionOrigin, DatagramSocket, HealthStatus,
    Outbound, OutboundConnection, OutboundGroup, OutboundManager, ProviderListener,
    UdpOutboundHandle,
};
use crate::provider::{Provider, ProviderManager};
use crate::store::SelectionStore;

/// Outbound type name of selector groups
pub const SELECTOR_TYPE: &str = "selector";

/// Collaborators of a selector
#[derive(Clone)]
pub struct SelectorContext {
    /// Resolves static member tags and the fallback outbound
    pub outbounds: Arc<OutboundManager>,
    /// Resolves bound providers
    pub providers: Arc<ProviderManager>,
    /// Persists the active member
    pub store: Option<Arc<dyn SelectionStore>>,
    /// Bridges inbound connections to members without their own handler
    pub connections: Arc<ConnectionManager>,
}

impl std::fmt::Debug for SelectorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectorContext")
            .field("outbounds", &self.outbounds.len())
            .field("providers", &self.providers.len())
            .field("store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

/// The active member
struct Selected {
    outbound: Arc<dyn Outbound>,
}

/// Candidate set produced by one rebuild
struct Candidates {
    tags: Vec<String>,
    outbounds: HashMap<String, Arc<dyn Outbound>>,
    cache: HashMap<String, Vec<Arc<dyn Outbound>>>,
}

#[derive(Default)]
struct SelectorState {
    /// Candidate tags: static members first, then provider members
    tags: Vec<String>,
    outbounds: HashMap<String, Arc<dyn Outbound>>,
    /// Filtered outbounds of each bound provider from its last fetch
    cache: HashMap<String, Vec<Arc<dyn Outbound>>>,
    /// Provider tags in binding order
    provider_tags: Vec<String>,
    /// Resolved providers; unresolved tags are absent
    bound: HashMap<String, Arc<dyn Provider>>,
    started: bool,
}

/// Outbound group with one explicitly or automatically chosen member
pub struct Selector {
    tag: String,
    static_tags: Vec<String>,
    default_tag: Option<String>,
    configured_providers: Vec<String>,
    use_all_providers: bool,
    include: Option<Regex>,
    exclude: Option<Regex>,
    interrupt_external: bool,
    ctx: SelectorContext,
    state: Mutex<SelectorState>,
    selected: ArcSwapOption<Selected>,
    interrupt: InterruptGroup,
    stats: Arc<OutboundStats>,
}

fn compile(kind: &'static str, pattern: Option<&str>) -> Result<Option<Regex>, SelectorError> {
    match pattern.filter(|p| !p.is_empty()) {
        Some(p) => Regex::new(p)
            .map(Some)
            .map_err(|e| SelectorError::invalid_pattern(kind, p, &e)),
        None => Ok(None),
    }
}

fn same_outbound(a: &Arc<dyn Outbound>, b: &Arc<dyn Outbound>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl Selector {
    /// Create a selector from configuration
    ///
    /// Nothing is resolved until [`Selector::start`].
    ///
    /// # Errors
    ///
    /// Returns `SelectorError::InvalidPattern` if the include or exclude
    /// pattern does not compile.
    pub fn new(ctx: SelectorContext, config: &SelectorConfig) -> Result<Self, SelectorError> {
        let exclude = compile("exclude", config.exclude.as_deref())?;
        let include = compile("include", config.include.as_deref())?;

        Ok(Self {
            tag: config.tag.clone(),
            static_tags: config.outbounds.clone(),
            default_tag: config.default.clone().filter(|t| !t.is_empty()),
            configured_providers: config.providers.clone(),
            use_all_providers: config.use_all_providers,
            include,
            exclude,
            interrupt_external: config.interrupt_exist_connections,
            ctx,
            state: Mutex::new(SelectorState::default()),
            selected: ArcSwapOption::empty(),
            interrupt: InterruptGroup::new(),
            stats: Arc::new(OutboundStats::new()),
        })
    }

    /// Bind providers, build the candidate set and choose the initial member
    ///
    /// # Errors
    ///
    /// Returns `SelectorError::MissingTags` when there is nothing to select
    /// from, or the resolution error of the candidate set or initial member.
    pub fn start(&self) -> Result<(), SelectorError> {
        let mut state = self.state.lock();

        state.bound.clear();
        if self.use_all_providers {
            let providers = self.ctx.providers.providers();
            state.provider_tags = providers.iter().map(|p| p.tag().to_string()).collect();
            for provider in providers {
                state.bound.insert(provider.tag().to_string(), provider);
            }
        } else {
            state.provider_tags = self.configured_providers.clone();
            for (index, tag) in self.configured_providers.iter().enumerate() {
                match self.ctx.providers.provider(tag) {
                    Some(provider) => {
                        state.bound.insert(tag.clone(), provider);
                    }
                    None => warn!(
                        "Selector {}: outbound provider {} not found: {}",
                        self.tag, index, tag
                    ),
                }
            }
        }

        if self.static_tags.is_empty() && state.provider_tags.is_empty() {
            return Err(SelectorError::MissingTags);
        }

        let candidates = self.filter_outbounds(&state, None)?;
        Self::commit(&mut state, candidates);

        let outbound = self.outbound_select(&state)?;
        info!(
            "Selector {} started with {} candidates, selected {}",
            self.tag,
            state.tags.len(),
            outbound.tag()
        );
        self.selected.store(Some(Arc::new(Selected { outbound })));
        state.started = true;
        Ok(())
    }

    /// Build the candidate set
    ///
    /// Providers other than `changed` are served from the cache when they
    /// have an entry; `changed` and uncached providers are fetched and
    /// filtered again.
    fn filter_outbounds(
        &self,
        state: &SelectorState,
        changed: Option<&str>,
    ) -> Result<Candidates, SelectorError> {
        let mut tags = Vec::with_capacity(self.static_tags.len());
        let mut outbounds = HashMap::new();
        let mut cache = HashMap::with_capacity(state.provider_tags.len());

        for (index, tag) in self.static_tags.iter().enumerate() {
            let outbound =
                self.ctx
                    .outbounds
                    .get(tag)
                    .ok_or_else(|| SelectorError::OutboundNotFound {
                        index,
                        tag: tag.clone(),
                    })?;
            tags.push(tag.clone());
            outbounds.insert(tag.clone(), outbound);
        }

        if let Some(default) = &self.default_tag {
            if !outbounds.contains_key(default) {
                return Err(SelectorError::DefaultNotFound(default.clone()));
            }
        }

        for provider_tag in &state.provider_tags {
            let cached = state
                .cache
                .get(provider_tag)
                .filter(|_| changed != Some(provider_tag.as_str()));

            let members = match cached {
                Some(members) => members.clone(),
                None => {
                    let Some(provider) = state.bound.get(provider_tag) else {
                        continue;
                    };
                    provider
                        .outbounds()
                        .into_iter()
                        .filter(|o| self.accepts(o.tag()))
                        .collect()
                }
            };

            for outbound in &members {
                tags.push(outbound.tag().to_string());
                outbounds.insert(outbound.tag().to_string(), Arc::clone(outbound));
            }
            cache.insert(provider_tag.clone(), members);
        }

        if tags.is_empty() {
            let fallback = self
                .ctx
                .outbounds
                .get(COMPATIBLE_OUTBOUND_TAG)
                .ok_or_else(|| SelectorError::FallbackMissing(COMPATIBLE_OUTBOUND_TAG.to_string()))?;
            debug!("Selector {} has no candidates, using {}", self.tag, COMPATIBLE_OUTBOUND_TAG);
            tags.push(fallback.tag().to_string());
            outbounds.insert(fallback.tag().to_string(), fallback);
        }

        Ok(Candidates {
            tags,
            outbounds,
            cache,
        })
    }

    fn accepts(&self, tag: &str) -> bool {
        if let Some(include) = &self.include {
            if !include.is_match(tag) {
                return false;
            }
        }
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(tag) {
                return false;
            }
        }
        true
    }

    fn commit(state: &mut SelectorState, candidates: Candidates) {
        state.tags = candidates.tags;
        state.outbounds = candidates.outbounds;
        state.cache = candidates.cache;
    }

    /// Resolve the member to use: persisted choice, then default, then first
    fn outbound_select(&self, state: &SelectorState) -> Result<Arc<dyn Outbound>, SelectorError> {
        if !self.tag.is_empty() {
            if let Some(store) = &self.ctx.store {
                if let Some(persisted) = store.load_selected(&self.tag) {
                    if let Some(outbound) = state.outbounds.get(&persisted) {
                        return Ok(Arc::clone(outbound));
                    }
                }
            }
        }

        if let Some(default) = &self.default_tag {
            return state
                .outbounds
                .get(default)
                .cloned()
                .ok_or_else(|| SelectorError::DefaultNotFound(default.clone()));
        }

        state
            .tags
            .first()
            .and_then(|tag| state.outbounds.get(tag))
            .cloned()
            .ok_or_else(|| SelectorError::NotStarted(self.tag.clone()))
    }

    /// Make `tag` the active member
    ///
    /// Returns `false` if `tag` is not a candidate. Selecting the member that
    /// is already active returns `true` and does nothing else. Otherwise the
    /// choice is persisted and the connections of this group are
    /// interrupted, external ones only when configured.
    pub fn select_outbound(&self, tag: &str) -> bool {
        let state = self.state.lock();
        self.select_locked(&state, tag)
    }

    fn select_locked(&self, state: &SelectorState, tag: &str) -> bool {
        let Some(outbound) = state.outbounds.get(tag) else {
            return false;
        };

        let previous = self.selected.swap(Some(Arc::new(Selected {
            outbound: Arc::clone(outbound),
        })));
        if let Some(previous) = &previous {
            if same_outbound(&previous.outbound, outbound) {
                return true;
            }
        }

        info!(
            "Selector {} switched from {} to {}",
            self.tag,
            previous
                .as_ref()
                .map_or("<none>", |p| p.outbound.tag()),
            tag
        );

        if !self.tag.is_empty() {
            if let Some(store) = &self.ctx.store {
                if let Err(e) = store.store_selected(&self.tag, tag) {
                    error!("Selector {}: failed to store selection: {}", self.tag, e);
                }
            }
        }

        self.interrupt.interrupt(self.interrupt_external);
        true
    }

    /// Rebuild the candidate set after `provider_tag` changed
    ///
    /// The binding is re-resolved through the provider manager first, so a
    /// provider replaced under the same tag is followed and a removed one
    /// contributes nothing. The candidate set is always refreshed. The
    /// active member is only re-resolved when no other bound provider is
    /// mid-update, or when the active member is no longer a candidate.
    ///
    /// # Errors
    ///
    /// Returns `SelectorError::ProviderNotBound` if `provider_tag` is not
    /// bound to this selector, or the resolution error of the rebuild, in
    /// which case the previous candidate set stays in effect. Reselection
    /// failures are logged.
    pub fn update_outbounds(&self, provider_tag: &str) -> Result<(), SelectorError> {
        let mut state = self.state.lock();
        let Some(bound) = state.bound.get(provider_tag).cloned() else {
            return Err(SelectorError::ProviderNotBound(provider_tag.to_string()));
        };

        match self.ctx.providers.provider(provider_tag) {
            Some(current)
                if !std::ptr::addr_eq(Arc::as_ptr(&bound), Arc::as_ptr(&current)) =>
            {
                debug!(
                    "Selector {}: provider {} was replaced, rebinding",
                    self.tag, provider_tag
                );
                state.bound.insert(provider_tag.to_string(), current);
            }
            Some(_) => {}
            None => {
                debug!(
                    "Selector {}: provider {} is gone, dropping its members",
                    self.tag, provider_tag
                );
                state.bound.remove(provider_tag);
            }
        }

        let candidates = self
            .filter_outbounds(&state, Some(provider_tag))
            .inspect_err(|e| {
                warn!(
                    "Selector {}: rebuild after provider {} update failed: {}",
                    self.tag, provider_tag, e
                );
            })?;
        Self::commit(&mut state, candidates);

        let others_updating = state
            .bound
            .iter()
            .any(|(tag, provider)| tag != provider_tag && provider.is_updating());
        if others_updating && self.active_is_candidate(&state) {
            debug!(
                "Selector {}: other providers updating, deferring reselection",
                self.tag
            );
            return Ok(());
        }

        match self.outbound_select(&state) {
            Ok(outbound) => {
                let tag = outbound.tag().to_string();
                self.select_locked(&state, &tag);
            }
            Err(e) => debug!("Selector {}: reselection failed: {}", self.tag, e),
        }
        Ok(())
    }

    fn active_is_candidate(&self, state: &SelectorState) -> bool {
        match self.selected.load().as_ref() {
            Some(selected) => state
                .outbounds
                .get(selected.outbound.tag())
                .is_some_and(|o| same_outbound(o, &selected.outbound)),
            None => false,
        }
    }

    /// Check if `tag` is one of this selector's providers
    #[must_use]
    pub fn has_provider(&self, tag: &str) -> bool {
        if self.use_all_providers {
            return self.ctx.providers.provider(tag).is_some();
        }
        self.configured_providers.iter().any(|t| t == tag)
    }

    /// Effective tag of the active member, following nested groups
    ///
    /// Before start this is the first candidate tag, or empty.
    #[must_use]
    pub fn now(&self) -> String {
        match self.selected.load_full() {
            Some(selected) => real_tag(selected.outbound.as_ref()),
            None => self.state.lock().tags.first().cloned().unwrap_or_default(),
        }
    }

    /// Tag of the active member itself
    #[must_use]
    pub fn selected_tag(&self) -> Option<String> {
        self.selected
            .load()
            .as_ref()
            .map(|s| s.outbound.tag().to_string())
    }

    /// Candidate tags in order
    #[must_use]
    pub fn all(&self) -> Vec<String> {
        self.state.lock().tags.clone()
    }

    /// Check if the selector has been started
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    fn active(&self) -> Result<Arc<dyn Outbound>, OutboundError> {
        self.selected
            .load()
            .as_ref()
            .map(|s| Arc::clone(&s.outbound))
            .ok_or_else(|| OutboundError::unavailable(&self.tag, "no outbound selected"))
    }
}

#[async_trait]
impl Outbound for Selector {
    async fn connect(
        &self,
        addr: SocketAddr,
        timeout: Duration,
        origin: ConnectionOrigin,
    ) -> Result<OutboundConnection, OutboundError> {
        let outbound = self.active()?;
        self.stats.record_connection();
        let conn = outbound
            .connect(addr, timeout, origin)
            .await
            .inspect_err(|_| self.stats.record_error())?;
        Ok(conn.map_stream(|stream| self.interrupt.wrap_stream(stream, origin)))
    }

    async fn connect_udp(
        &self,
        addr: SocketAddr,
        timeout: Duration,
        origin: ConnectionOrigin,
    ) -> Result<UdpOutboundHandle, OutboundError> {
        let outbound = self.active()?;
        self.stats.record_connection();
        let handle = outbound
            .connect_udp(addr, timeout, origin)
            .await
            .inspect_err(|_| self.stats.record_error())?;
        Ok(handle.map_socket(|socket| self.interrupt.wrap_packet(socket, origin)))
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    fn outbound_type(&self) -> &str {
        SELECTOR_TYPE
    }

    fn health_status(&self) -> HealthStatus {
        self.selected
            .load()
            .as_ref()
            .map_or(HealthStatus::Unknown, |s| s.outbound.health_status())
    }

    fn stats(&self) -> Arc<OutboundStats> {
        Arc::clone(&self.stats)
    }

    fn supports_udp(&self) -> bool {
        self.selected
            .load()
            .as_ref()
            .map_or(true, |s| s.outbound.supports_udp())
    }

    fn dependencies(&self) -> Vec<String> {
        self.static_tags.clone()
    }

    fn as_group(&self) -> Option<&dyn OutboundGroup> {
        Some(self)
    }

    fn as_connection_handler(&self) -> Option<&dyn ConnectionHandler> {
        Some(self)
    }

    fn as_provider_listener(&self) -> Option<&dyn ProviderListener> {
        Some(self)
    }
}

impl OutboundGroup for Selector {
    fn now(&self) -> String {
        Selector::now(self)
    }

    fn all(&self) -> Vec<String> {
        Selector::all(self)
    }
}

impl ProviderListener for Selector {
    fn has_provider(&self, tag: &str) -> bool {
        Selector::has_provider(self, tag)
    }

    fn update_outbounds(&self, provider_tag: &str) -> Result<(), SelectorError> {
        Selector::update_outbounds(self, provider_tag)
    }
}

#[async_trait]
impl ConnectionHandler for Selector {
    async fn handle_connection(
        &self,
        stream: BoxedStream,
        metadata: InboundContext,
    ) -> Result<CopyResult, ConnectionError> {
        let outbound = self.active()?;
        let stream = self.interrupt.wrap_stream(stream, ConnectionOrigin::External);
        match outbound.as_connection_handler() {
            Some(handler) => handler.handle_connection(stream, metadata).await,
            None => {
                self.ctx
                    .connections
                    .new_connection(
                        outbound.as_ref(),
                        stream,
                        &metadata,
                        ConnectionOrigin::External,
                    )
                    .await
            }
        }
    }

    async fn handle_packet_connection(
        &self,
        socket: Box<dyn DatagramSocket>,
        metadata: InboundContext,
    ) -> Result<CopyResult, ConnectionError> {
        let outbound = self.active()?;
        let socket = self.interrupt.wrap_packet(socket, ConnectionOrigin::External);
        match outbound.as_connection_handler() {
            Some(handler) => handler.handle_packet_connection(socket, metadata).await,
            None => {
                self.ctx
                    .connections
                    .new_packet_connection(
                        outbound.as_ref(),
                        socket,
                        &metadata,
                        ConnectionOrigin::External,
                    )
                    .await
            }
        }
    }
}

impl std::fmt::Debug for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector")
            .field("tag", &self.tag)
            .field("selected", &self.selected_tag())
            .field("static_tags", &self.static_tags)
            .field("providers", &self.configured_providers)
            .field("use_all_providers", &self.use_all_providers)
            .finish_non_exhaustive()
    }
}
