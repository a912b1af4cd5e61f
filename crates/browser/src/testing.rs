//! Scriptable in-memory session for exercising extraction flows without a
//! browser. Nodes are keyed by the exact selector string the code under
//! test asks for.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::BrowserError;
use crate::session::{BrowserSession, By, SessionFactory};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq)]
pub struct FakeElement {
    pub id: u64,
    pub text: String,
    pub attrs: HashMap<String, String>,
    pub displayed: bool,
    pub enabled: bool,
}

impl FakeElement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            text: text.into(),
            attrs: HashMap::new(),
            displayed: true,
            enabled: true,
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.displayed = false;
        self
    }
}

/// DOM changes applied when an element is clicked.
#[derive(Debug, Clone, Default)]
pub struct ClickEffect {
    pub insert: Vec<(String, Vec<FakeElement>)>,
    pub remove: Vec<String>,
    pub page_html: Option<String>,
    pub url: Option<String>,
}

impl ClickEffect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, selector: &str, elements: Vec<FakeElement>) -> Self {
        self.insert.push((selector.to_string(), elements));
        self
    }

    pub fn remove(mut self, selector: &str) -> Self {
        self.remove.push(selector.to_string());
        self
    }

    pub fn page_html(mut self, html: impl Into<String>) -> Self {
        self.page_html = Some(html.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Appends `per_trigger` items under `selector` on every scroll trigger,
/// for at most `max_triggers` triggers (unbounded when `None`).
#[derive(Debug, Clone)]
pub struct Growth {
    pub selector: String,
    pub per_trigger: usize,
    pub max_triggers: Option<usize>,
}

#[derive(Debug, Default)]
pub struct FakeDom {
    nodes: HashMap<String, Vec<FakeElement>>,
    children: HashMap<(u64, String), FakeElement>,
    click_effects: HashMap<u64, ClickEffect>,
    intercepts: HashMap<u64, usize>,
    growth: Option<Growth>,
    page_html: String,
    current_url: String,
    pub fail_goto: bool,
    pub lost_after_clicks: Option<usize>,
    pub visited: Vec<String>,
    pub clicks: Vec<u64>,
    pub js_clicks: Vec<u64>,
    pub triggers: usize,
    pub escape_presses: usize,
    pub closes: usize,
}

impl FakeDom {
    pub fn insert(&mut self, selector: &str, elements: Vec<FakeElement>) {
        self.nodes.insert(selector.to_string(), elements);
    }

    pub fn remove(&mut self, selector: &str) {
        self.nodes.remove(selector);
    }

    pub fn insert_child(&mut self, parent: &FakeElement, selector: &str, child: FakeElement) {
        self.children.insert((parent.id, selector.to_string()), child);
    }

    pub fn on_click(&mut self, element: &FakeElement, effect: ClickEffect) {
        self.click_effects.insert(element.id, effect);
    }

    /// The next `times` clicks on `element` fail as intercepted.
    pub fn intercept(&mut self, element: &FakeElement, times: usize) {
        self.intercepts.insert(element.id, times);
    }

    pub fn grow(&mut self, growth: Growth) {
        self.growth = Some(growth);
    }

    pub fn set_page_html(&mut self, html: impl Into<String>) {
        self.page_html = html.into();
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.current_url = url.into();
    }

    pub fn count(&self, selector: &str) -> usize {
        self.nodes.get(selector).map_or(0, Vec::len)
    }

    pub fn nodes(&self, selector: &str) -> Vec<FakeElement> {
        self.nodes.get(selector).cloned().unwrap_or_default()
    }

    fn apply(&mut self, effect: ClickEffect) {
        for selector in effect.remove {
            self.nodes.remove(&selector);
        }
        for (selector, elements) in effect.insert {
            self.nodes.insert(selector, elements);
        }
        if let Some(html) = effect.page_html {
            self.page_html = html;
        }
        if let Some(url) = effect.url {
            self.current_url = url;
        }
    }

    fn trigger_growth(&mut self) {
        self.triggers += 1;
        let Some(growth) = self.growth.clone() else {
            return;
        };
        if growth.max_triggers.is_some_and(|max| self.triggers > max) {
            return;
        }
        let items = self.nodes.entry(growth.selector).or_default();
        for _ in 0..growth.per_trigger {
            let n = items.len() + 1;
            items.push(FakeElement::new(format!("item {}", n)));
        }
    }

    fn check_alive(&self) -> Result<(), BrowserError> {
        if self.closes > 0 {
            return Err(BrowserError::SessionLost("session already closed".into()));
        }
        match self.lost_after_clicks {
            Some(limit) if self.clicks.len() >= limit => {
                Err(BrowserError::SessionLost("chrome not reachable".into()))
            }
            _ => Ok(()),
        }
    }
}

/// Cheap to clone; clones share one DOM so tests can inspect a session
/// after the code under test has consumed it.
#[derive(Debug, Clone, Default)]
pub struct FakeSession {
    dom: Arc<Mutex<FakeDom>>,
}

impl FakeSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dom(&self) -> MutexGuard<'_, FakeDom> {
        self.dom.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    type Element = FakeElement;

    async fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        let mut dom = self.dom();
        dom.check_alive()?;
        if dom.fail_goto {
            return Err(BrowserError::SessionLost("navigation crashed the tab".into()));
        }
        dom.visited.push(url.to_string());
        dom.current_url = url.to_string();
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, BrowserError> {
        let dom = self.dom();
        dom.check_alive()?;
        Ok(dom.current_url.clone())
    }

    async fn page_source(&mut self) -> Result<String, BrowserError> {
        let dom = self.dom();
        dom.check_alive()?;
        Ok(dom.page_html.clone())
    }

    async fn find(&mut self, by: &By) -> Result<Option<FakeElement>, BrowserError> {
        let dom = self.dom();
        dom.check_alive()?;
        Ok(dom.nodes.get(by.as_str()).and_then(|v| v.first().cloned()))
    }

    async fn find_all(&mut self, by: &By) -> Result<Vec<FakeElement>, BrowserError> {
        let dom = self.dom();
        dom.check_alive()?;
        Ok(dom.nodes.get(by.as_str()).cloned().unwrap_or_default())
    }

    async fn find_within(
        &mut self,
        parent: &FakeElement,
        by: &By,
    ) -> Result<Option<FakeElement>, BrowserError> {
        let dom = self.dom();
        dom.check_alive()?;
        Ok(dom.children.get(&(parent.id, by.as_str().to_string())).cloned())
    }

    async fn is_displayed(&mut self, element: &FakeElement) -> Result<bool, BrowserError> {
        Ok(element.displayed)
    }

    async fn is_enabled(&mut self, element: &FakeElement) -> Result<bool, BrowserError> {
        Ok(element.enabled)
    }

    async fn text(&mut self, element: &FakeElement) -> Result<String, BrowserError> {
        Ok(element.text.clone())
    }

    async fn attr(
        &mut self,
        element: &FakeElement,
        name: &str,
    ) -> Result<Option<String>, BrowserError> {
        Ok(element.attrs.get(name).cloned())
    }

    async fn click(&mut self, element: &FakeElement) -> Result<(), BrowserError> {
        let mut dom = self.dom();
        dom.check_alive()?;
        dom.clicks.push(element.id);
        if let Some(remaining) = dom.intercepts.get_mut(&element.id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BrowserError::ClickIntercepted {
                    target: element.text.clone(),
                });
            }
        }
        if let Some(effect) = dom.click_effects.get(&element.id).cloned() {
            dom.apply(effect);
        }
        Ok(())
    }

    async fn js_click(&mut self, element: &FakeElement) -> Result<(), BrowserError> {
        let mut dom = self.dom();
        dom.check_alive()?;
        dom.js_clicks.push(element.id);
        if let Some(effect) = dom.click_effects.get(&element.id).cloned() {
            dom.apply(effect);
        }
        Ok(())
    }

    async fn scroll_into_view(&mut self, _element: &FakeElement) -> Result<(), BrowserError> {
        self.dom().check_alive()
    }

    async fn scroll_by(&mut self, _dy: i64) -> Result<(), BrowserError> {
        self.dom().check_alive()
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), BrowserError> {
        let mut dom = self.dom();
        dom.check_alive()?;
        dom.trigger_growth();
        Ok(())
    }

    async fn scroll_element_to_bottom(&mut self, _element: &FakeElement) -> Result<(), BrowserError> {
        let mut dom = self.dom();
        dom.check_alive()?;
        dom.trigger_growth();
        Ok(())
    }

    async fn press_escape(&mut self) -> Result<(), BrowserError> {
        let mut dom = self.dom();
        dom.check_alive()?;
        dom.escape_presses += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.dom().closes += 1;
        Ok(())
    }
}

/// Hands out prepared sessions in order; fails once they run out.
#[derive(Debug, Default)]
pub struct FakeFactory {
    sessions: Mutex<VecDeque<FakeSession>>,
}

impl FakeFactory {
    pub fn new(sessions: Vec<FakeSession>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
        }
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    type Session = FakeSession;

    async fn open(&self) -> Result<FakeSession, BrowserError> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .ok_or_else(|| BrowserError::Launch("no webdriver available".into()))
    }
}
