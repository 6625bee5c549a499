//! Plain-HTTP discovery endpoints answered before any upgrade
//!
//! | Path | Response |
//! |------|----------|
//! | `/json/version` | product and protocol version |
//! | `/json`, `/json/list` | the single debuggable target |
//! | `/json/activate/<pid>` | `Target activated` when `<pid>` is this process |

use inspector_transport::Response;
use serde_json::json;

use crate::CONTROL_PATH;

pub const PROTOCOL_VERSION: &str = "1.1";
pub const TARGET_TYPE: &str = "node";
pub const TARGET_ACTIVATED: &str = "Target activated";

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/45.0.2446.0 Safari/537.36";
const WEBKIT_VERSION: &str = "537.36 (@198122)";
const FRONTEND_URL: &str = "https://chrome-devtools-frontend.appspot.com/serve_file/\
                            @4604d24a75168768584760ba56d175507941852f/inspector.html";
const FAVICON_URL: &str = "https://nodejs.org/static/favicon.ico";

const PATH_LIST: &str = "/json/list";
const PATH_JSON: &str = "/json";
const PATH_VERSION: &str = "/json/version";
const PATH_ACTIVATE: &str = "/json/activate/";

/// Identity of the debuggee advertised to discovery clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryInfo {
    pub product: String,
    pub version: String,
    pub title: String,
    pub pid: u32,
}

impl DiscoveryInfo {
    /// Describe the running process
    pub fn current() -> Self {
        let title = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
        DiscoveryInfo {
            product: env!("CARGO_PKG_NAME").to_string(),
            version: format!("v{}", env!("CARGO_PKG_VERSION")),
            title,
            pid: std::process::id(),
        }
    }

    /// Answer a discovery GET. `host` is `host:port` as the client reached us.
    /// None means the request is not a discovery endpoint and must be rejected.
    pub fn respond(&self, path: &str, host: &str) -> Option<Response> {
        if path == PATH_VERSION {
            Some(self.version_response())
        } else if path == PATH_LIST || path == PATH_JSON {
            Some(self.list_response(host))
        } else if let Some(pid) = path.strip_prefix(PATH_ACTIVATE) {
            (parse_leading_int(pid) == Some(i64::from(self.pid)))
                .then(|| Response::text(TARGET_ACTIVATED))
        } else {
            None
        }
    }

    fn version_response(&self) -> Response {
        let body = json!([{
            "Browser": format!("{}/{}", self.product, self.version),
            "Protocol-Version": PROTOCOL_VERSION,
            "User-Agent": USER_AGENT,
            "WebKit-Version": WEBKIT_VERSION,
        }]);
        Response::json(body.to_string())
    }

    fn list_response(&self, host: &str) -> Response {
        let body = json!([{
            "description": format!("{} instance", self.product),
            "devtoolsFrontendUrl": FRONTEND_URL,
            "faviconUrl": FAVICON_URL,
            "id": self.pid.to_string(),
            "title": sanitize_title(&self.title),
            "type": TARGET_TYPE,
            "webSocketDebuggerUrl": websocket_url(host),
        }]);
        Response::json(body.to_string())
    }
}

impl Default for DiscoveryInfo {
    fn default() -> Self {
        Self::current()
    }
}

/// `ws://` URL a frontend connects to
pub fn websocket_url(host: &str) -> String {
    format!("ws://{}{}", host, CONTROL_PATH)
}

/// DevTools URL printed when the agent starts listening
pub fn frontend_url(host: &str) -> String {
    format!(
        "chrome-devtools://devtools/bundled/inspector.html?experiments=true&v8only=true&ws={}{}",
        host, CONTROL_PATH
    )
}

fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| if c < ' ' || c == '"' { '_' } else { c })
        .collect()
}

/// Leading optional sign and digits, like C's `atoi` (without overflow UB)
fn parse_leading_int(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let sign_len = usize::from(s.starts_with('-') || s.starts_with('+'));
    let digits = s[sign_len..]
        .find(|c: char| !c.is_ascii_digit())
        .map_or(s.len(), |end| end + sign_len);
    s[..digits].parse().ok()
}
