//! Mock renderer: simulates web pages without a browser engine.
//!
//! Serves canned pages and updates the Object Manager as navigation and
//! form interaction occur. No network, no DOM, just enough simulation to
//! validate object lifecycle, checkpoint/rollback, audit completeness and
//! capability enforcement.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{json, Map, Value};
use tracing::debug;

use super::{ExtractKind, Renderer, RendererError};
use crate::object::{form_attrs, FormKind, LoadState, ObjectId, ObjectKind, ObjectManager};

/// Callback invoked on form submission, for tests that need to observe
/// or script the "server" response.
pub type SubmitCallback = Box<dyn Fn(ObjectId, &Map<String, Value>) -> Value + Send + Sync>;

/// A simulated form on a page.
#[derive(Debug, Clone)]
pub struct MockForm {
    /// Form kind.
    pub kind: FormKind,
    /// Submit endpoint.
    pub action: String,
    /// HTTP method.
    pub method: String,
    /// Field name → field descriptor.
    pub fields: Map<String, Value>,
}

impl MockForm {
    /// A standard login form (email + password).
    #[must_use]
    pub fn login() -> Self {
        Self {
            kind: FormKind::Login,
            action: "/login".into(),
            method: "POST".into(),
            fields: to_map(json!({
                "email": {"type": "email", "required": true, "label": "Email"},
                "password": {"type": "password", "required": true, "label": "Password"},
            })),
        }
    }

    /// A standard search box.
    #[must_use]
    pub fn search() -> Self {
        Self {
            kind: FormKind::Search,
            action: "/search".into(),
            method: "GET".into(),
            fields: to_map(json!({
                "q": {"type": "text", "required": true, "label": "Search"},
            })),
        }
    }

    /// A contact form.
    #[must_use]
    pub fn contact() -> Self {
        Self {
            kind: FormKind::Contact,
            action: "/contact".into(),
            method: "POST".into(),
            fields: to_map(json!({
                "name": {"type": "text", "required": true, "label": "Name"},
                "email": {"type": "email", "required": true, "label": "Email"},
                "message": {"type": "textarea", "required": true, "label": "Message"},
            })),
        }
    }
}

/// A simulated web page.
#[derive(Debug, Clone, Default)]
pub struct MockPage {
    /// Canonical URL.
    pub url: String,
    /// Page title.
    pub title: String,
    /// Readable content.
    pub content: String,
    /// Forms present on the page.
    pub forms: Vec<MockForm>,
    /// Links present on the page.
    pub links: Vec<Value>,
    /// Tables present on the page.
    pub tables: Vec<Value>,
}

impl MockPage {
    /// A plain content page.
    #[must_use]
    pub fn new(url: &str, title: &str, content: &str) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    /// Adds a form.
    #[must_use]
    pub fn with_form(mut self, form: MockForm) -> Self {
        self.forms.push(form);
        self
    }

    /// Adds a link.
    #[must_use]
    pub fn with_link(mut self, text: &str, href: &str) -> Self {
        self.links.push(json!({"text": text, "href": href}));
        self
    }
}

fn to_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Splits a URL into `(host, path)`; scheme is ignored.
fn split_url(url: &str) -> (String, String) {
    let rest = url
        .split_once("://")
        .map_or(url, |(_, rest)| rest);
    match rest.split_once('/') {
        Some((host, path)) => (host.to_string(), format!("/{path}")),
        None => (rest.to_string(), "/".to_string()),
    }
}

#[derive(Default)]
struct SiteRegistry {
    sites: HashMap<String, HashMap<String, MockPage>>,
}

impl SiteRegistry {
    fn register(&mut self, page: MockPage) {
        let (host, path) = split_url(&page.url);
        self.sites.entry(host).or_default().insert(path, page);
    }

    fn get(&self, url: &str) -> Option<&MockPage> {
        let (host, path) = split_url(url);
        self.sites.get(&host)?.get(&path)
    }

    fn not_found(url: &str) -> MockPage {
        MockPage::new(
            url,
            "404 Not Found",
            &format!("The page at {url} was not found."),
        )
    }

    fn with_default_sites() -> Self {
        let mut registry = Self::default();
        registry.register(
            MockPage::new(
                "https://example.com/",
                "Example Domain",
                "This domain is for use in illustrative examples in documents.",
            )
            .with_link("More information...", "https://www.iana.org/domains/example"),
        );
        registry.register(
            MockPage::new(
                "https://example.com/login",
                "Login - Example",
                "Please log in to continue.",
            )
            .with_form(MockForm::login()),
        );
        registry.register(
            MockPage::new(
                "https://example.com/dashboard",
                "Dashboard - Example",
                "Welcome back! Here's your dashboard.",
            )
            .with_link("Settings", "/settings")
            .with_link("Logout", "/logout"),
        );
        registry.register(
            MockPage::new(
                "https://example.com/contact",
                "Contact Us - Example",
                "Get in touch with our team.",
            )
            .with_form(MockForm::contact()),
        );
        registry.register(
            MockPage::new("https://search.example.com/", "Example Search", "Search the web.")
                .with_form(MockForm::search()),
        );
        registry.register(
            MockPage::new(
                "https://search.example.com/results",
                "Search Results - Example Search",
                "Results for your query.",
            )
            .with_link("Result 1", "https://result1.example.com")
            .with_link("Result 2", "https://result2.example.com"),
        );
        let mut data_page = MockPage::new("https://data.example.com/", "Data Table", "Sample data table.");
        data_page.tables.push(json!({
            "headers": ["Name", "Email", "Status"],
            "rows": [
                ["Alice", "alice@example.com", "Active"],
                ["Bob", "bob@example.com", "Pending"],
            ],
        }));
        registry.register(data_page);
        registry
    }
}

#[derive(Default)]
struct MockState {
    registry: SiteRegistry,
    /// tab id → current page.
    tab_pages: HashMap<ObjectId, MockPage>,
}

/// The mock renderer.
pub struct MockRenderer {
    objects: Arc<ObjectManager>,
    state: Mutex<MockState>,
    submit_callback: Mutex<Option<SubmitCallback>>,
}

impl std::fmt::Debug for MockRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRenderer").finish_non_exhaustive()
    }
}

impl MockRenderer {
    /// Creates a mock renderer pre-loaded with the default site set.
    #[must_use]
    pub fn new(objects: Arc<ObjectManager>) -> Self {
        Self {
            objects,
            state: Mutex::new(MockState {
                registry: SiteRegistry::with_default_sites(),
                tab_pages: HashMap::new(),
            }),
            submit_callback: Mutex::new(None),
        }
    }

    /// Registers a custom page.
    pub fn register_page(&self, page: MockPage) {
        self.state.lock().unwrap().registry.register(page);
    }

    /// Installs a submission callback (tests).
    pub fn set_submit_callback(&self, callback: SubmitCallback) {
        *self.submit_callback.lock().unwrap() = Some(callback);
    }

    fn patch(&self, id: ObjectId, pairs: &[(&str, Value)]) -> Result<(), RendererError> {
        let mut map = Map::new();
        for (key, value) in pairs {
            map.insert((*key).to_string(), value.clone());
        }
        self.objects
            .update(id, map)
            .map_err(|_| RendererError::TargetNotFound { id: id.to_string() })?;
        Ok(())
    }
}

impl Renderer for MockRenderer {
    fn navigate(&self, tab: ObjectId, url: &str) -> Result<LoadState, RendererError> {
        if self.objects.get(tab).is_none() {
            return Err(RendererError::TargetNotFound {
                id: tab.to_string(),
            });
        }
        self.patch(
            tab,
            &[
                ("url", Value::String(url.into())),
                ("load_state", Value::String(LoadState::Loading.as_str().into())),
            ],
        )?;

        let page = {
            let state = self.state.lock().unwrap();
            state
                .registry
                .get(url)
                .cloned()
                .unwrap_or_else(|| SiteRegistry::not_found(url))
        };
        self.patch(
            tab,
            &[
                ("title", Value::String(page.title.clone())),
                ("load_state", Value::String(LoadState::Complete.as_str().into())),
            ],
        )?;
        debug!(tab = %tab, url, "mock navigation complete");
        self.state.lock().unwrap().tab_pages.insert(tab, page);
        Ok(LoadState::Complete)
    }

    fn wait_for(&self, tab: ObjectId, state: LoadState) -> Result<(), RendererError> {
        // Loads settle synchronously here; just record the state.
        self.patch(tab, &[("load_state", Value::String(state.as_str().into()))])
    }

    fn extract(&self, tab: ObjectId, kind: ExtractKind) -> Result<Value, RendererError> {
        let state = self.state.lock().unwrap();
        let page = state
            .tab_pages
            .get(&tab)
            .ok_or_else(|| RendererError::NoPage {
                tab_id: tab.to_string(),
            })?;
        Ok(match kind {
            ExtractKind::Markdown => json!({
                "type": "markdown",
                "url": page.url,
                "title": page.title,
                "content": page.content,
                "word_count": page.content.split_whitespace().count(),
            }),
            ExtractKind::Forms => json!({
                "forms": page
                    .forms
                    .iter()
                    .map(|f| json!({
                        "kind": f.kind.as_str(),
                        "action": f.action,
                        "method": f.method,
                        "fields": f.fields.keys().collect::<Vec<_>>(),
                    }))
                    .collect::<Vec<_>>(),
            }),
            ExtractKind::Links => json!({ "links": page.links }),
            ExtractKind::Tables => json!({ "tables": page.tables }),
        })
    }

    fn find_form(&self, tab: ObjectId, kind: FormKind) -> Result<Option<ObjectId>, RendererError> {
        let mock_form = {
            let state = self.state.lock().unwrap();
            let page = state
                .tab_pages
                .get(&tab)
                .ok_or_else(|| RendererError::NoPage {
                    tab_id: tab.to_string(),
                })?;
            page.forms
                .iter()
                .find(|f| kind == FormKind::Generic || f.kind == kind)
                .cloned()
        };
        let Some(mock_form) = mock_form else {
            return Ok(None);
        };

        let mut attrs = form_attrs(&tab.to_string(), mock_form.kind);
        attrs.insert("fields".into(), Value::Object(mock_form.fields));
        attrs.insert("action".into(), Value::String(mock_form.action));
        attrs.insert("method".into(), Value::String(mock_form.method));
        let view = self.objects.create(ObjectKind::Form, attrs);
        Ok(Some(view.id))
    }

    fn fill_form(
        &self,
        form: ObjectId,
        values: &Map<String, Value>,
    ) -> Result<(), RendererError> {
        let view = self
            .objects
            .get(form)
            .ok_or_else(|| RendererError::TargetNotFound {
                id: form.to_string(),
            })?;
        let mut filled = view
            .attrs
            .get("filled")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        for (key, value) in values {
            filled.insert(key.clone(), value.clone());
        }
        self.patch(form, &[("filled", Value::Object(filled))])
    }

    fn clear_form(&self, form: ObjectId) -> Result<(), RendererError> {
        self.patch(form, &[("filled", Value::Object(Map::new()))])
    }

    fn submit_form(&self, form: ObjectId) -> Result<Value, RendererError> {
        let view = self
            .objects
            .get(form)
            .ok_or_else(|| RendererError::TargetNotFound {
                id: form.to_string(),
            })?;
        let filled = view
            .attrs
            .get("filled")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let action = view.attr_str("action").unwrap_or("/").to_string();
        let method = view.attr_str("method").unwrap_or("POST").to_string();

        self.patch(form, &[("submitted", Value::Bool(true))])?;

        if let Some(callback) = self.submit_callback.lock().unwrap().as_ref() {
            return Ok(callback(form, &filled));
        }
        Ok(json!({
            "submitted": true,
            "form_id": form.to_string(),
            "action": action,
            "method": method,
            "response": {"status": 200, "body": "Form submitted successfully (mock)"},
        }))
    }

    fn dispose(&self, tab: ObjectId) -> Result<(), RendererError> {
        self.state.lock().unwrap().tab_pages.remove(&tab);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::tab_attrs;

    fn fixture() -> (Arc<ObjectManager>, MockRenderer) {
        let objects = Arc::new(ObjectManager::new());
        let renderer = MockRenderer::new(Arc::clone(&objects));
        (objects, renderer)
    }

    #[test]
    fn navigate_updates_tab_state() {
        let (objects, renderer) = fixture();
        let tab = objects.create(ObjectKind::Tab, tab_attrs("", None));
        let state = renderer.navigate(tab.id, "https://example.com/").unwrap();
        assert_eq!(state, LoadState::Complete);

        let view = objects.get(tab.id).unwrap();
        assert_eq!(view.attr_str("url"), Some("https://example.com/"));
        assert_eq!(view.attr_str("title"), Some("Example Domain"));
        assert_eq!(view.attr_str("load_state"), Some("complete"));
    }

    #[test]
    fn unknown_urls_get_a_404_page() {
        let (objects, renderer) = fixture();
        let tab = objects.create(ObjectKind::Tab, tab_attrs("", None));
        renderer
            .navigate(tab.id, "https://nowhere.example/missing")
            .unwrap();
        assert_eq!(
            objects.get(tab.id).unwrap().attr_str("title"),
            Some("404 Not Found")
        );
    }

    #[test]
    fn extract_markdown_and_links() {
        let (objects, renderer) = fixture();
        let tab = objects.create(ObjectKind::Tab, tab_attrs("", None));
        renderer.navigate(tab.id, "https://example.com/").unwrap();

        let md = renderer.extract(tab.id, ExtractKind::Markdown).unwrap();
        assert_eq!(md["title"], "Example Domain");
        assert!(md["word_count"].as_u64().unwrap() > 0);

        let links = renderer.extract(tab.id, ExtractKind::Links).unwrap();
        assert_eq!(links["links"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn extract_without_page_fails() {
        let (objects, renderer) = fixture();
        let tab = objects.create(ObjectKind::Tab, tab_attrs("", None));
        let err = renderer.extract(tab.id, ExtractKind::Markdown).unwrap_err();
        assert!(matches!(err, RendererError::NoPage { .. }));
    }

    #[test]
    fn find_fill_submit_form() {
        let (objects, renderer) = fixture();
        let tab = objects.create(ObjectKind::Tab, tab_attrs("", None));
        renderer.navigate(tab.id, "https://example.com/login").unwrap();

        let form = renderer
            .find_form(tab.id, FormKind::Login)
            .unwrap()
            .expect("login page has a login form");

        let mut values = Map::new();
        values.insert("email".into(), Value::String("alice@example.com".into()));
        renderer.fill_form(form, &values).unwrap();
        let view = objects.get(form).unwrap();
        assert_eq!(
            view.attrs["filled"]["email"],
            Value::String("alice@example.com".into())
        );

        let result = renderer.submit_form(form).unwrap();
        assert_eq!(result["submitted"], Value::Bool(true));
        assert_eq!(objects.get(form).unwrap().attr_bool("submitted"), Some(true));
    }

    #[test]
    fn find_form_misses_wrong_kind() {
        let (objects, renderer) = fixture();
        let tab = objects.create(ObjectKind::Tab, tab_attrs("", None));
        renderer.navigate(tab.id, "https://example.com/").unwrap();
        assert!(renderer.find_form(tab.id, FormKind::Login).unwrap().is_none());
    }

    #[test]
    fn submit_callback_overrides_response() {
        let (objects, renderer) = fixture();
        renderer.set_submit_callback(Box::new(|_form, filled| {
            json!({"fields_seen": filled.len()})
        }));
        let tab = objects.create(ObjectKind::Tab, tab_attrs("", None));
        renderer.navigate(tab.id, "https://example.com/login").unwrap();
        let form = renderer.find_form(tab.id, FormKind::Login).unwrap().unwrap();

        let mut values = Map::new();
        values.insert("email".into(), Value::String("a@b.c".into()));
        renderer.fill_form(form, &values).unwrap();
        let result = renderer.submit_form(form).unwrap();
        assert_eq!(result["fields_seen"], Value::from(1));
    }
}
