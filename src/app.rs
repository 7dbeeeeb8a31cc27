//! Application state management for the price dashboard
//!
//! This module contains the main application state: one panel per resource
//! with its own date range and cache snapshots, keyboard handling, the refresh
//! cooldown, and draining of cache and background events.

use chrono::{Days, Local, NaiveDate, TimeDelta};
use crossterm::event::{KeyCode, KeyEvent};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheEvent, QueryCache, QueryKey};
use crate::cli::DashboardConfig;
use crate::data::{min_date, DateRange, FetchError, PriceType, RefreshCommand, Resource};
use crate::format::DisplayZone;
use crate::refresh::{Cooldown, CooldownState, CooldownTimer, TICK_PERIOD};

/// Days moved by the large date step keys
const LARGE_DATE_STEP: i64 = 30;

/// Messages sent from background tasks to the main loop
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// One second of cooldown elapsed for the timer started at `epoch`
    CooldownTick { epoch: u64 },
    /// A refresh command finished
    RefreshFinished {
        command: RefreshCommand,
        result: Result<String, FetchError>,
    },
}

/// Which end of a date range the arrow keys move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RangeField {
    #[default]
    Start,
    End,
}

impl RangeField {
    fn toggled(self) -> Self {
        match self {
            RangeField::Start => RangeField::End,
            RangeField::End => RangeField::Start,
        }
    }
}

/// View state of one resource column
#[derive(Debug, Clone)]
pub struct Panel {
    pub resource: Resource,
    /// Selected date range of the chart
    pub range: DateRange,
    /// Last snapshot of the series query
    pub series: Option<CacheEntry>,
    /// Last snapshot of the latest-point query
    pub latest: Option<CacheEntry>,
}

impl Panel {
    fn new(resource: Resource, range: DateRange) -> Self {
        Self {
            resource,
            range,
            series: None,
            latest: None,
        }
    }

    pub fn series_key(&self) -> QueryKey {
        QueryKey::series(self.resource, self.range)
    }

    pub fn latest_key(&self) -> QueryKey {
        QueryKey::latest(self.resource)
    }
}

/// Main application struct managing state and data
pub struct App {
    /// One panel per resource, in display order
    pub panels: Vec<Panel>,
    /// Index of the panel whose date range the keys edit
    pub focused: usize,
    /// Date range end being edited
    pub field: RangeField,
    /// Price column charted for gold and bitcoin
    pub price_type: PriceType,
    /// Time zone of chart labels
    pub display_zone: DisplayZone,
    /// Flag indicating the application should quit
    pub should_quit: bool,
    /// Flag to show help overlay
    pub show_help: bool,
    /// Outcome of the last refresh, shown in the status bar
    pub status: Option<String>,
    /// Refresh gate
    pub cooldown: Cooldown,
    cooldown_timer: Option<CooldownTimer>,
    cooldown_epoch: u64,
    /// Last selectable date (tomorrow at startup)
    max_date: NaiveDate,
    cache: QueryCache,
    cache_events: broadcast::Receiver<CacheEvent>,
    events_tx: mpsc::UnboundedSender<AppEvent>,
    events_rx: mpsc::UnboundedReceiver<AppEvent>,
}

impl App {
    /// Creates a new App reading through `cache`
    pub fn new(cache: QueryCache, config: &DashboardConfig) -> Self {
        Self::with_today(cache, config, Local::now().date_naive())
    }

    /// Creates a new App as if the local date were `today`
    pub fn with_today(cache: QueryCache, config: &DashboardConfig, today: NaiveDate) -> Self {
        let range = DateRange::default_for(today);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            panels: Resource::ALL
                .iter()
                .map(|resource| Panel::new(*resource, range))
                .collect(),
            focused: 0,
            field: RangeField::Start,
            price_type: config.price_type,
            display_zone: config.display_zone,
            should_quit: false,
            show_help: false,
            status: None,
            cooldown: Cooldown::new(),
            cooldown_timer: None,
            cooldown_epoch: 0,
            max_date: range.end(),
            cache_events: cache.subscribe(),
            cache,
            events_tx,
            events_rx,
        }
    }

    /// Reads every panel's queries, starting fetches where needed
    pub fn load_all(&mut self) {
        for index in 0..self.panels.len() {
            self.sync_panel(index);
        }
    }

    /// Re-reads both queries of one panel
    fn sync_panel(&mut self, index: usize) {
        let Some(panel) = self.panels.get(index) else {
            return;
        };
        let series = self.cache.read(&panel.series_key());
        let latest = self.cache.read(&panel.latest_key());

        let panel = &mut self.panels[index];
        panel.series = Some(series);
        panel.latest = Some(latest);
    }

    /// Drains cache notifications and background events without blocking
    pub fn process_events(&mut self) {
        loop {
            match self.cache_events.try_recv() {
                Ok(event) => self.handle_cache_event(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "cache events lagged, resyncing");
                    self.load_all();
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_app_event(event);
        }
    }

    fn handle_cache_event(&mut self, event: CacheEvent) {
        match event {
            CacheEvent::Updated(key) => {
                for panel in self.panels.iter_mut().filter(|p| p.resource == key.resource) {
                    if key == panel.series_key() {
                        panel.series = self.cache.peek(&key);
                    } else if key == panel.latest_key() {
                        panel.latest = self.cache.peek(&key);
                    }
                }
            }
            CacheEvent::Invalidated(resource) => {
                let indices: Vec<usize> = self
                    .panels
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.resource == resource)
                    .map(|(i, _)| i)
                    .collect();
                for index in indices {
                    self.sync_panel(index);
                }
            }
        }
    }

    fn handle_app_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::CooldownTick { epoch } => {
                if epoch != self.cooldown_epoch {
                    return;
                }
                if self.cooldown.tick() == CooldownState::Idle {
                    // Dropping the handle stops the tick task.
                    self.cooldown_timer = None;
                }
            }
            AppEvent::RefreshFinished { command, result } => {
                self.status = Some(match result {
                    Ok(message) if message.is_empty() => format!("Refreshed {}", command.label()),
                    Ok(message) => format!("Refreshed {}: {}", command.label(), message),
                    Err(err) => format!("Failed to refresh {}: {}", command.label(), err),
                });
            }
        }
    }

    /// Whether the refresh trigger is currently enabled
    pub fn can_refresh(&self) -> bool {
        self.cooldown.is_idle()
    }

    /// Sends both refresh commands and starts the cooldown in the same step
    ///
    /// Returns `false` without dispatching anything while the cooldown runs.
    /// The cooldown starts regardless of the commands' outcome.
    pub fn trigger_refresh(&mut self) -> bool {
        if !self.cooldown.trigger() {
            debug!(remaining = self.cooldown.remaining_seconds(), "refresh ignored during cooldown");
            return false;
        }

        self.cooldown_epoch += 1;
        self.cooldown_timer = Some(CooldownTimer::start(
            TICK_PERIOD,
            self.events_tx.clone(),
            AppEvent::CooldownTick {
                epoch: self.cooldown_epoch,
            },
        ));

        info!("dispatching refresh commands");
        let cache = self.cache.clone();
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let results = futures::future::join_all(
                RefreshCommand::ALL.map(|command| cache.write(command)),
            )
            .await;

            for (command, result) in RefreshCommand::ALL.into_iter().zip(results) {
                let result = result.map(|receipt| receipt.message);
                if events_tx
                    .send(AppEvent::RefreshFinished { command, result })
                    .is_err()
                {
                    warn!("app closed before refresh finished");
                }
            }
        });

        true
    }

    /// Switches between USD and VND asset prices
    pub fn toggle_price_type(&mut self) {
        self.price_type = self.price_type.toggled();
    }

    /// The panel whose range is being edited
    pub fn focused_panel(&self) -> &Panel {
        &self.panels[self.focused]
    }

    fn focus_next(&mut self) {
        self.focused = (self.focused + 1) % self.panels.len();
    }

    fn focus_previous(&mut self) {
        if self.focused == 0 {
            self.focused = self.panels.len() - 1;
        } else {
            self.focused -= 1;
        }
    }

    /// Moves the edited date of the focused panel by `days`
    ///
    /// Dates stay within `[min_date(), max_date]`; moving the start past the
    /// end pushes the end along, moving the end before the start stops at it.
    pub fn shift_date(&mut self, days: i64) {
        let panel = &self.panels[self.focused];
        let current = match self.field {
            RangeField::Start => panel.range.start(),
            RangeField::End => panel.range.end(),
        };

        let moved = current
            .checked_add_signed(TimeDelta::days(days))
            .unwrap_or(current)
            .clamp(min_date(), self.max_date);

        let range = match self.field {
            RangeField::Start => panel.range.with_start(moved),
            RangeField::End => panel.range.with_end(moved),
        };
        if range != panel.range {
            self.set_range(range);
        }
    }

    /// Points the focused panel at `range`, abandoning the old range's fetch
    fn set_range(&mut self, range: DateRange) {
        let previous = self.panels[self.focused].series_key();
        self.panels[self.focused].range = range;
        self.cache.cancel(&previous);
        self.sync_panel(self.focused);
    }

    /// Last selectable date
    pub fn max_date(&self) -> NaiveDate {
        self.max_date
    }

    /// Resets the focused panel to the default range
    fn reset_range(&mut self) {
        let today = self.max_date.checked_sub_days(Days::new(1)).unwrap_or(self.max_date);
        let range = DateRange::default_for(today);
        if self.panels[self.focused].range != range {
            self.set_range(range);
        }
    }

    /// Handles keyboard input and updates state accordingly
    ///
    /// # Key Bindings
    /// - `q` or `Esc`: Quit the application
    /// - `Tab`/`Shift-Tab`: Focus next/previous panel
    /// - `f`: Switch between editing From and To
    /// - `Left`/`h`, `Right`/`l`: Move the edited date by one day
    /// - `[`, `]`: Move the edited date by thirty days
    /// - `0`: Reset the focused panel's range
    /// - `r`: Refresh prices (disabled during cooldown)
    /// - `u`: Switch between USD and VND prices
    /// - `g`: Reload all panels (retries failed reads)
    /// - `?`: Toggle help
    pub fn handle_key(&mut self, key_event: KeyEvent) {
        if self.show_help {
            match key_event.code {
                KeyCode::Esc | KeyCode::Char('?') | KeyCode::Char('q') => {
                    self.show_help = false;
                }
                _ => {}
            }
            return;
        }

        match key_event.code {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_quit = true;
            }
            KeyCode::Tab => self.focus_next(),
            KeyCode::BackTab => self.focus_previous(),
            KeyCode::Char('f') => {
                self.field = self.field.toggled();
            }
            KeyCode::Left | KeyCode::Char('h') => self.shift_date(-1),
            KeyCode::Right | KeyCode::Char('l') => self.shift_date(1),
            KeyCode::Char('[') => self.shift_date(-LARGE_DATE_STEP),
            KeyCode::Char(']') => self.shift_date(LARGE_DATE_STEP),
            KeyCode::Char('0') => self.reset_range(),
            KeyCode::Char('r') => {
                self.trigger_refresh();
            }
            KeyCode::Char('u') => self.toggle_price_type(),
            KeyCode::Char('g') => self.load_all(),
            KeyCode::Char('?') => {
                self.show_help = true;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::data::fake::FakePriceApi;
    use crossterm::event::KeyModifiers;
    use std::sync::Arc;
    use std::time::Duration;

    /// Helper to create a KeyEvent for testing
    fn key_event(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn test_app() -> (App, Arc<FakePriceApi>) {
        let api = Arc::new(FakePriceApi::new());
        let cache = QueryCache::new(api.clone(), CacheConfig::default());
        let app = App::with_today(cache, &DashboardConfig::default(), today());
        (app, api)
    }

    fn all_settled(app: &App) -> bool {
        app.panels.iter().all(|panel| {
            [&panel.series, &panel.latest]
                .iter()
                .all(|entry| entry.as_ref().is_some_and(|e| !e.is_fetching && !e.is_loading()))
        })
    }

    /// Processes events until every panel shows fetched data
    async fn settle(app: &mut App) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                app.process_events();
                if all_settled(app) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("panels did not settle");
    }

    fn series_value(panel: &Panel) -> Option<f64> {
        panel
            .series
            .as_ref()
            .and_then(|entry| entry.series())
            .and_then(|points| points.first())
            .map(|point| point.value(PriceType::Usd))
    }

    #[test]
    fn test_new_app_has_one_panel_per_resource() {
        let (app, _api) = test_app();
        let resources: Vec<Resource> = app.panels.iter().map(|p| p.resource).collect();
        assert_eq!(resources, Resource::ALL.to_vec());
        assert_eq!(app.price_type, PriceType::Usd);
        assert!(app.can_refresh());
        assert!(!app.should_quit);
    }

    #[test]
    fn test_new_app_uses_default_ranges() {
        let (app, _api) = test_app();
        for panel in &app.panels {
            assert_eq!(panel.range.start(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
            assert_eq!(panel.range.end(), NaiveDate::from_ymd_opt(2024, 6, 16).unwrap());
        }
        assert_eq!(app.max_date(), NaiveDate::from_ymd_opt(2024, 6, 16).unwrap());
    }

    #[tokio::test]
    async fn test_load_all_fetches_each_query_once() {
        let (mut app, api) = test_app();

        app.load_all();
        settle(&mut app).await;

        assert_eq!(api.total_fetches(), 6);
        assert_eq!(series_value(&app.panels[0]), Some(1.0));
    }

    #[tokio::test]
    async fn test_panels_render_independently() {
        let (mut app, api) = test_app();
        api.hold_reads();
        app.load_all();

        // Every panel reports its own loading state; none blocks the others.
        for panel in &app.panels {
            assert!(panel.series.as_ref().unwrap().is_loading());
        }

        api.release_reads();
        settle(&mut app).await;
        assert!(app.panels.iter().all(|p| series_value(p).is_some()));
    }

    #[test]
    fn test_q_quits() {
        let (mut app, _api) = test_app();
        app.handle_key(key_event(KeyCode::Char('q')));
        assert!(app.should_quit);
    }

    #[test]
    fn test_u_toggles_price_type() {
        let (mut app, _api) = test_app();
        app.handle_key(key_event(KeyCode::Char('u')));
        assert_eq!(app.price_type, PriceType::Vnd);
        app.handle_key(key_event(KeyCode::Char('u')));
        assert_eq!(app.price_type, PriceType::Usd);
    }

    #[test]
    fn test_tab_cycles_focus() {
        let (mut app, _api) = test_app();
        app.handle_key(key_event(KeyCode::Tab));
        assert_eq!(app.focused, 1);
        app.handle_key(key_event(KeyCode::Tab));
        app.handle_key(key_event(KeyCode::Tab));
        assert_eq!(app.focused, 0);
        app.handle_key(key_event(KeyCode::BackTab));
        assert_eq!(app.focused, 2);
    }

    #[test]
    fn test_help_overlay_intercepts_keys() {
        let (mut app, _api) = test_app();
        app.handle_key(key_event(KeyCode::Char('?')));
        assert!(app.show_help);

        app.handle_key(key_event(KeyCode::Char('u')));
        assert_eq!(app.price_type, PriceType::Usd, "keys ignored while help is shown");

        app.handle_key(key_event(KeyCode::Char('q')));
        assert!(!app.show_help);
        assert!(!app.should_quit);
    }

    #[tokio::test]
    async fn test_shift_start_date_reads_new_range() {
        let (mut app, api) = test_app();
        app.load_all();
        settle(&mut app).await;

        app.handle_key(key_event(KeyCode::Right));

        let panel = app.focused_panel();
        assert_eq!(panel.range.start(), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert!(panel.series.as_ref().unwrap().is_fetching);
        let key = panel.series_key();

        settle(&mut app).await;
        assert_eq!(api.fetch_count(&key), 1);
        assert_eq!(app.panels[1].range.start(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }

    #[tokio::test]
    async fn test_stepping_range_cancels_previous_fetch() {
        let (mut app, api) = test_app();
        app.load_all();
        settle(&mut app).await;

        api.hold_reads();
        app.handle_key(key_event(KeyCode::Right));
        let abandoned = app.focused_panel().series_key();
        assert!(app.cache.peek(&abandoned).unwrap().is_fetching);

        app.handle_key(key_event(KeyCode::Right));
        assert!(!app.cache.peek(&abandoned).unwrap().is_fetching);
        let current = app.focused_panel().series_key();
        assert!(app.cache.peek(&current).unwrap().is_fetching);

        api.release_reads();
        settle(&mut app).await;
        let entry = app.cache.peek(&abandoned).unwrap();
        assert!(entry.data.is_none(), "cancelled range never completes");
        assert!(app.focused_panel().series.as_ref().unwrap().series().is_some());
    }

    #[tokio::test]
    async fn test_end_date_cannot_pass_max_date() {
        let (mut app, _api) = test_app();
        app.handle_key(key_event(KeyCode::Char('f')));
        assert_eq!(app.field, RangeField::End);

        app.handle_key(key_event(KeyCode::Char(']')));

        assert_eq!(app.focused_panel().range.end(), app.max_date());
    }

    #[tokio::test]
    async fn test_end_date_stops_at_start_date() {
        let (mut app, _api) = test_app();
        app.handle_key(key_event(KeyCode::Char('f')));
        for _ in 0..10 {
            app.handle_key(key_event(KeyCode::Char('[')));
        }

        let range = app.focused_panel().range;
        assert_eq!(range.end(), range.start());
    }

    #[tokio::test]
    async fn test_start_date_stops_at_min_date() {
        let (mut app, _api) = test_app();
        for _ in 0..400 {
            app.handle_key(key_event(KeyCode::Char('[')));
        }
        assert_eq!(app.focused_panel().range.start(), min_date());
    }

    #[tokio::test]
    async fn test_reset_range_restores_default() {
        let (mut app, _api) = test_app();
        app.handle_key(key_event(KeyCode::Char(']')));
        app.handle_key(key_event(KeyCode::Char('0')));
        assert_eq!(app.focused_panel().range, DateRange::default_for(today()));
    }

    #[tokio::test]
    async fn test_refresh_dispatches_both_commands_and_updates_panels() {
        let (mut app, api) = test_app();
        app.load_all();
        settle(&mut app).await;

        app.handle_key(key_event(KeyCode::Char('r')));
        assert_eq!(app.cooldown.remaining_seconds(), 10);
        assert!(!app.can_refresh());

        // Both results are reported only after both writes and their
        // invalidations completed.
        tokio::time::timeout(Duration::from_secs(5), async {
            while app.status.is_none() {
                app.process_events();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("refresh commands not reported");
        settle(&mut app).await;

        assert_eq!(api.version(), 3);

        let mut writes = api.writes();
        writes.sort_by_key(|command| command.label());
        assert_eq!(
            writes,
            vec![RefreshCommand::RefreshAssetPrices, RefreshCommand::RefreshExchangeRates]
        );
        assert!(app.panels.iter().all(|p| series_value(p) == Some(3.0)));
        assert!(app.status.as_deref().unwrap_or("").starts_with("Refreshed"));
    }

    #[tokio::test]
    async fn test_failed_refresh_still_starts_cooldown() {
        let (mut app, api) = test_app();
        api.set_fail_writes(true);

        assert!(app.trigger_refresh());
        assert_eq!(app.cooldown.remaining_seconds(), 10);

        tokio::time::timeout(Duration::from_secs(5), async {
            while app.status.is_none() {
                app.process_events();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("refresh result not reported");

        assert!(app.status.as_deref().unwrap().starts_with("Failed to refresh"));
        assert!(!app.can_refresh());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_trigger_does_not_extend_cooldown() {
        let (mut app, api) = test_app();

        assert!(app.trigger_refresh());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        app.process_events();
        assert_eq!(app.cooldown.remaining_seconds(), 7);

        assert!(!app.trigger_refresh(), "trigger during cooldown is a no-op");
        app.handle_key(key_event(KeyCode::Char('r')));
        assert_eq!(app.cooldown.remaining_seconds(), 7);

        tokio::time::sleep(Duration::from_secs(6)).await;
        app.process_events();
        assert_eq!(app.cooldown.remaining_seconds(), 1, "still blocked at +9.5s");

        tokio::time::sleep(Duration::from_secs(1)).await;
        app.process_events();
        assert!(app.can_refresh(), "idle again at +10s, not +13s");

        assert_eq!(api.writes().len(), 2, "only the first trigger dispatched writes");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_tick_from_previous_timer_is_ignored() {
        let (mut app, _api) = test_app();
        app.trigger_refresh();
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        app.process_events();
        assert!(app.can_refresh());

        app.handle_app_event(AppEvent::CooldownTick { epoch: 1 });
        assert!(app.trigger_refresh());
        app.handle_app_event(AppEvent::CooldownTick { epoch: 1 });
        assert_eq!(app.cooldown.remaining_seconds(), 10);
    }

    #[tokio::test]
    async fn test_failed_read_retried_by_reload() {
        let (mut app, api) = test_app();
        api.set_fail_reads(true);
        app.load_all();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                app.process_events();
                let failed = app.panels.iter().all(|p| {
                    p.series.as_ref().is_some_and(|e| e.error().is_some() && !e.is_fetching)
                });
                if failed {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("reads did not fail");

        api.set_fail_reads(false);
        app.handle_key(key_event(KeyCode::Char('g')));
        settle(&mut app).await;
        assert!(app.panels.iter().all(|p| series_value(p) == Some(1.0)));
    }
}
