#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use mutuelle_sync::interception::{InterceptionRegistry, PayloadTag};
use mutuelle_sync::portal::{selectors, Portal};
use serde_json::{json, Value};

/// Something a scripted page does in reaction to the connector.
#[derive(Debug, Clone)]
pub enum Effect {
    /// An intercepted response arrives.
    Respond(PayloadTag, Value),
    Show(String),
    Hide(String),
}

pub fn respond(tag: PayloadTag, payload: Value) -> Effect {
    Effect::Respond(tag, payload)
}

pub fn show(selector: &str) -> Effect {
    Effect::Show(selector.to_string())
}

pub fn hide(selector: &str) -> Effect {
    Effect::Hide(selector.to_string())
}

/// Click key for `selector` inside the `scope_index`-th `scope` element.
pub fn scoped(scope: &str, scope_index: usize, selector: &str) -> String {
    format!("{scope}[{scope_index}] {selector}")
}

/// Click key for `selector` inside the month-group at `group_index`.
pub fn in_group(group_index: usize, selector: &str) -> String {
    scoped(selectors::MONTH_GROUP, group_index, selector)
}

#[derive(Default)]
struct PageState {
    present: HashSet<String>,
    texts: HashMap<String, Vec<String>>,
    on_click: HashMap<(String, usize), Vec<Effect>>,
    on_goto: Vec<Effect>,
    on_reload: Vec<Effect>,
    evaluations: HashMap<String, VecDeque<(Value, Vec<Effect>)>>,
    clicks: Vec<(String, usize)>,
    fills: Vec<(String, String)>,
    user_agents: Vec<String>,
    init_scripts: usize,
    visibility: Vec<bool>,
    gotos: Vec<String>,
    reloads: usize,
}

/// A scripted portal page.
///
/// Selectors are present or absent, clicks and navigations trigger
/// [`Effect`]s, and script evaluations return queued values (`null` once the
/// queue is empty). Scoped clicks are keyed by [`scoped`].
pub struct MockPortal {
    registry: Arc<InterceptionRegistry>,
    state: Mutex<PageState>,
}

impl MockPortal {
    pub fn new(registry: Arc<InterceptionRegistry>) -> Self {
        Self {
            registry,
            state: Mutex::new(PageState::default()),
        }
    }

    pub fn with_present(self, selector: &str) -> Self {
        self.state.lock().unwrap().present.insert(selector.to_string());
        self
    }

    pub fn with_texts(self, selector: &str, texts: &[&str]) -> Self {
        self.state
            .lock()
            .unwrap()
            .texts
            .insert(selector.to_string(), texts.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn on_click(self, selector: &str, index: usize, effects: Vec<Effect>) -> Self {
        self.state
            .lock()
            .unwrap()
            .on_click
            .insert((selector.to_string(), index), effects);
        self
    }

    pub fn on_goto(self, effects: Vec<Effect>) -> Self {
        self.state.lock().unwrap().on_goto = effects;
        self
    }

    pub fn on_reload(self, effects: Vec<Effect>) -> Self {
        self.state.lock().unwrap().on_reload = effects;
        self
    }

    pub fn on_evaluate(self, script: &str, value: Value, effects: Vec<Effect>) -> Self {
        self.state
            .lock()
            .unwrap()
            .evaluations
            .entry(script.to_string())
            .or_default()
            .push_back((value, effects));
        self
    }

    pub fn registry(&self) -> &InterceptionRegistry {
        &self.registry
    }

    pub fn clicks(&self) -> Vec<(String, usize)> {
        self.state.lock().unwrap().clicks.clone()
    }

    pub fn clicked(&self, selector: &str) -> bool {
        self.clicks().iter().any(|(s, _)| s == selector)
    }

    pub fn fills(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().fills.clone()
    }

    pub fn user_agents(&self) -> Vec<String> {
        self.state.lock().unwrap().user_agents.clone()
    }

    pub fn visibility(&self) -> Vec<bool> {
        self.state.lock().unwrap().visibility.clone()
    }

    pub fn reloads(&self) -> usize {
        self.state.lock().unwrap().reloads
    }

    pub fn is_shown(&self, selector: &str) -> bool {
        self.state.lock().unwrap().present.contains(selector)
    }

    fn apply(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Respond(tag, payload) => self.registry.push(tag, payload),
                Effect::Show(selector) => {
                    self.state.lock().unwrap().present.insert(selector);
                }
                Effect::Hide(selector) => {
                    self.state.lock().unwrap().present.remove(&selector);
                }
            }
        }
    }
}

#[async_trait]
impl Portal for MockPortal {
    async fn goto(&self, url: &str) -> Result<()> {
        let effects = {
            let mut state = self.state.lock().unwrap();
            state.gotos.push(url.to_string());
            state.on_goto.clone()
        };
        self.apply(effects);
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        let effects = {
            let mut state = self.state.lock().unwrap();
            state.reloads += 1;
            state.on_reload.clone()
        };
        self.apply(effects);
        Ok(())
    }

    async fn is_present(&self, selector: &str) -> Result<bool> {
        Ok(self.is_shown(selector))
    }

    async fn click_nth(&self, selector: &str, index: usize) -> Result<()> {
        let effects = {
            let mut state = self.state.lock().unwrap();
            state.clicks.push((selector.to_string(), index));
            state
                .on_click
                .get(&(selector.to_string(), index))
                .cloned()
                .unwrap_or_default()
        };
        self.apply(effects);
        Ok(())
    }

    async fn click_within(
        &self,
        scope: &str,
        scope_index: usize,
        selector: &str,
        index: usize,
    ) -> Result<()> {
        self.click_nth(&scoped(scope, scope_index, selector), index).await
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .fills
            .push((selector.to_string(), value.to_string()));
        Ok(())
    }

    async fn texts(&self, selector: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .texts
            .get(selector)
            .cloned()
            .unwrap_or_default())
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        let next = self
            .state
            .lock()
            .unwrap()
            .evaluations
            .get_mut(script)
            .and_then(VecDeque::pop_front);
        match next {
            Some((value, effects)) => {
                self.apply(effects);
                Ok(value)
            }
            None => Ok(Value::Null),
        }
    }

    async fn add_init_script(&self, _script: &str) -> Result<()> {
        self.state.lock().unwrap().init_scripts += 1;
        Ok(())
    }

    async fn set_user_agent(&self, user_agent: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .user_agents
            .push(user_agent.to_string());
        Ok(())
    }

    async fn set_visible(&self, visible: bool) -> Result<()> {
        self.state.lock().unwrap().visibility.push(visible);
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(5)
    }
}

/// Personal information payload for a member living in Paris.
pub fn personal_info_payload() -> Value {
    json!({
        "profil": {
            "prenom": "A",
            "nom": "B",
            "dateNaissance": "1980-01-01",
            "coordonneesContact": {
                "email": "a@b.fr",
                "adresse": { "ville": "Paris", "codePostal": "75001" }
            }
        }
    })
}

/// Contact cards as scraped from the personal information page.
pub fn contact_cards() -> Value {
    json!([
        { "title": "Email et téléphone", "lines": ["Téléphone fixe : 01 02 03 04 05", "Téléphone mobile : À renseigner"] },
        { "title": "Adresse postale", "lines": ["1 rue de Rivoli"] }
    ])
}

/// A logged-in portal whose personal information page serves the default payload.
pub fn logged_in_portal(registry: Arc<InterceptionRegistry>) -> MockPortal {
    MockPortal::new(registry)
        .with_present(selectors::LOGOUT_LINK)
        .on_click(
            selectors::PERSONAL_INFO_LINK,
            0,
            vec![
                show(selectors::PERSONAL_INFO_BANNER),
                respond(PayloadTag::PersonalInfo, personal_info_payload()),
            ],
        )
        .on_evaluate(selectors::SCRAPE_CARDS_SCRIPT, contact_cards(), Vec::new())
}

/// `{contenu}` payload for a PDF whose bytes are `bytes`.
pub fn pdf_payload(bytes: &[u8], url: Option<&str>) -> Value {
    use base64::Engine;
    let contenu = base64::engine::general_purpose::STANDARD.encode(bytes);
    match url {
        Some(url) => json!({ "contenu": contenu, "url": url }),
        None => json!({ "contenu": contenu }),
    }
}
