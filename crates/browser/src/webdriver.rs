//! WebDriver-backed session (chromedriver or any W3C endpoint).

use async_trait::async_trait;
use fantoccini::actions::{InputSource, KeyAction, KeyActions};
use fantoccini::elements::Element;
use fantoccini::error::{CmdError, ErrorStatus};
use fantoccini::key::Key;
use fantoccini::{Client, ClientBuilder, Locator};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::error::BrowserError;
use crate::session::{BrowserSession, By, SessionFactory};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserOptions {
    pub webdriver_url: String,
    pub headless: bool,
    pub user_agent: String,
    pub extra_args: Vec<String>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".to_string(),
            headless: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            extra_args: Vec::new(),
        }
    }
}

impl BrowserOptions {
    /// Chrome launch arguments for a fresh session.
    pub fn chrome_args(&self) -> Vec<String> {
        let mut args = vec![
            "--disable-notifications".to_string(),
            "--disable-popup-blocking".to_string(),
            "--start-maximized".to_string(),
            format!("user-agent={}", self.user_agent),
        ];
        if self.headless {
            args.push("--headless=new".to_string());
            args.push("--window-size=1920,1080".to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Opens one WebDriver session per call.
#[derive(Debug, Clone)]
pub struct WebDriverFactory {
    options: BrowserOptions,
}

impl WebDriverFactory {
    pub fn new(options: BrowserOptions) -> Self {
        Self { options }
    }

    /// Query the WebDriver `/status` endpoint.
    pub async fn is_ready(&self) -> bool {
        let url = format!("{}/status", self.options.webdriver_url.trim_end_matches('/'));
        let Ok(response) = reqwest::get(&url).await else {
            return false;
        };
        match response.json::<serde_json::Value>().await {
            Ok(body) => body
                .pointer("/value/ready")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl SessionFactory for WebDriverFactory {
    type Session = WebDriverSession;

    async fn open(&self) -> Result<WebDriverSession, BrowserError> {
        let mut caps = serde_json::Map::new();
        caps.insert(
            "goog:chromeOptions".to_string(),
            json!({ "args": self.options.chrome_args() }),
        );

        let client = ClientBuilder::native()
            .capabilities(caps)
            .connect(&self.options.webdriver_url)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        info!(webdriver = %self.options.webdriver_url, "WebDriver session started");
        Ok(WebDriverSession { client })
    }
}

pub struct WebDriverSession {
    client: Client,
}

fn locator(by: &By) -> Locator<'_> {
    match by {
        By::Css(s) => Locator::Css(s),
        By::XPath(s) => Locator::XPath(s),
    }
}

fn map_err(err: CmdError) -> BrowserError {
    match &err {
        CmdError::Standard(wd) => match wd.error {
            ErrorStatus::ElementClickIntercepted => BrowserError::ClickIntercepted {
                target: wd.message.to_string(),
            },
            ErrorStatus::StaleElementReference => BrowserError::Stale,
            ErrorStatus::NoSuchElement => BrowserError::NotFound {
                selector: wd.message.to_string(),
            },
            ErrorStatus::InvalidSessionId | ErrorStatus::SessionNotCreated => {
                BrowserError::SessionLost(wd.message.to_string())
            }
            ErrorStatus::JavascriptError => BrowserError::Script(wd.message.to_string()),
            _ => BrowserError::Command(err.to_string()),
        },
        CmdError::Lost(_) => BrowserError::SessionLost(err.to_string()),
        _ => BrowserError::Command(err.to_string()),
    }
}

fn element_arg(element: &Element) -> Result<serde_json::Value, BrowserError> {
    serde_json::to_value(element).map_err(|e| BrowserError::Script(e.to_string()))
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    type Element = Element;

    async fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        self.client.goto(url).await.map_err(map_err)
    }

    async fn current_url(&mut self) -> Result<String, BrowserError> {
        let url = self.client.current_url().await.map_err(map_err)?;
        Ok(url.to_string())
    }

    async fn page_source(&mut self) -> Result<String, BrowserError> {
        self.client.source().await.map_err(map_err)
    }

    async fn find(&mut self, by: &By) -> Result<Option<Element>, BrowserError> {
        match self.client.find(locator(by)).await {
            Ok(element) => Ok(Some(element)),
            Err(e) if e.is_no_such_element() => Ok(None),
            Err(e) => Err(map_err(e)),
        }
    }

    async fn find_all(&mut self, by: &By) -> Result<Vec<Element>, BrowserError> {
        self.client.find_all(locator(by)).await.map_err(map_err)
    }

    async fn find_within(&mut self, parent: &Element, by: &By) -> Result<Option<Element>, BrowserError> {
        match parent.find(locator(by)).await {
            Ok(element) => Ok(Some(element)),
            Err(e) if e.is_no_such_element() => Ok(None),
            Err(e) => Err(map_err(e)),
        }
    }

    async fn is_displayed(&mut self, element: &Element) -> Result<bool, BrowserError> {
        element.is_displayed().await.map_err(map_err)
    }

    async fn is_enabled(&mut self, element: &Element) -> Result<bool, BrowserError> {
        element.is_enabled().await.map_err(map_err)
    }

    async fn text(&mut self, element: &Element) -> Result<String, BrowserError> {
        element.text().await.map_err(map_err)
    }

    async fn attr(&mut self, element: &Element, name: &str) -> Result<Option<String>, BrowserError> {
        element.attr(name).await.map_err(map_err)
    }

    async fn click(&mut self, element: &Element) -> Result<(), BrowserError> {
        element.click().await.map_err(map_err)
    }

    async fn js_click(&mut self, element: &Element) -> Result<(), BrowserError> {
        let arg = element_arg(element)?;
        self.client
            .execute("arguments[0].click();", vec![arg])
            .await
            .map(|_| ())
            .map_err(map_err)
    }

    async fn scroll_into_view(&mut self, element: &Element) -> Result<(), BrowserError> {
        let arg = element_arg(element)?;
        self.client
            .execute(
                "arguments[0].scrollIntoView({behavior: 'smooth', block: 'center'});",
                vec![arg],
            )
            .await
            .map(|_| ())
            .map_err(map_err)
    }

    async fn scroll_by(&mut self, dy: i64) -> Result<(), BrowserError> {
        self.client
            .execute("window.scrollBy(0, arguments[0]);", vec![json!(dy)])
            .await
            .map(|_| ())
            .map_err(map_err)
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), BrowserError> {
        self.client
            .execute("window.scrollTo(0, document.body.scrollHeight);", vec![])
            .await
            .map(|_| ())
            .map_err(map_err)
    }

    async fn scroll_element_to_bottom(&mut self, element: &Element) -> Result<(), BrowserError> {
        let arg = element_arg(element)?;
        self.client
            .execute("arguments[0].scrollTo(0, arguments[0].scrollHeight);", vec![arg])
            .await
            .map(|_| ())
            .map_err(map_err)
    }

    async fn press_escape(&mut self) -> Result<(), BrowserError> {
        let keys = KeyActions::new("keyboard".to_string())
            .then(KeyAction::Down {
                value: Key::Escape.into(),
            })
            .then(KeyAction::Up {
                value: Key::Escape.into(),
            });
        self.client.perform_actions(keys).await.map_err(map_err)
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.client.clone().close().await.map_err(map_err)
    }
}
