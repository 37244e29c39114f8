use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An inputcommand or outputcommand: `(name, args, kwargs)`.
///
/// On the wire (bridge bodies and websocket frames) this is the JSON array
/// `[name, [args...], {kwargs...}]`, e.g. `["text", ["look"], {}]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireMsg", into = "WireMsg")]
pub struct Msg {
    pub name: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

#[derive(Serialize, Deserialize)]
struct WireMsg(String, Vec<Value>, Map<String, Value>);

impl From<WireMsg> for Msg {
    fn from(w: WireMsg) -> Self {
        Msg {
            name: w.0,
            args: w.1,
            kwargs: w.2,
        }
    }
}

impl From<Msg> for WireMsg {
    fn from(m: Msg) -> Self {
        WireMsg(m.name, m.args, m.kwargs)
    }
}

impl Msg {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self::new("text").with_arg(s.into())
    }

    pub fn prompt(s: impl Into<String>) -> Self {
        Self::new("prompt").with_arg(s.into())
    }

    pub fn with_arg(mut self, v: impl Into<Value>) -> Self {
        self.args.push(v.into());
        self
    }

    pub fn with_kwarg(mut self, k: impl Into<String>, v: impl Into<Value>) -> Self {
        self.kwargs.insert(k.into(), v.into());
        self
    }

    /// The first positional argument when it's a string.
    pub fn first_str(&self) -> Option<&str> {
        self.args.first().and_then(Value::as_str)
    }

    /// All string positional arguments joined by newlines.
    pub fn joined_text(&self) -> String {
        let mut out = String::new();
        for s in self.args.iter().filter_map(Value::as_str) {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(s);
        }
        out
    }

    pub fn kwarg_str(&self, k: &str) -> Option<&str> {
        self.kwargs.get(k).and_then(Value::as_str)
    }

    pub fn to_json(&self) -> Vec<u8> {
        // A Msg is plain JSON values; serialization can't fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_json(b: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(b)
    }
}
