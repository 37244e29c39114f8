/// How many sessions an account may have and how they share puppets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultiSession {
    /// One session per account; a new login disconnects the old one.
    #[default]
    Single,
    /// Many sessions, all driving the same puppet.
    SharedPuppet,
    /// Many sessions, each with its own puppet.
    PerSession,
    /// Many sessions; several of them may drive one puppet.
    Shared,
}

impl MultiSession {
    pub fn from_mode(n: u8) -> Option<Self> {
        match n {
            0 => Some(MultiSession::Single),
            1 => Some(MultiSession::SharedPuppet),
            2 => Some(MultiSession::PerSession),
            3 => Some(MultiSession::Shared),
            _ => None,
        }
    }

    pub fn mode(self) -> u8 {
        match self {
            MultiSession::Single => 0,
            MultiSession::SharedPuppet => 1,
            MultiSession::PerSession => 2,
            MultiSession::Shared => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Highest authority first.
    pub permission_hierarchy: Vec<String>,
    /// Lock function modules loaded into the registry at startup.
    pub lock_func_modules: Vec<String>,
    pub multisession: MultiSession,
    /// Inputs held per session while a timed continuation is pending.
    pub max_queued_inputs: usize,
    /// Priority of the generated channel command set.
    pub channel_cmdset_priority: i32,

    pub unloggedin_cmdset: String,
    pub session_cmdset: String,
    pub account_cmdset: String,
    pub character_cmdset: String,
    /// Catalog keys merged into every lookup at the lowest source rank.
    pub system_cmdsets: Vec<String>,

    pub max_characters_per_account: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            permission_hierarchy: ["Developer", "Admin", "Builder", "Helper", "Player", "Guest"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            lock_func_modules: vec!["core".to_string(), "world".to_string()],
            multisession: MultiSession::Single,
            max_queued_inputs: 32,
            channel_cmdset_priority: 101,
            unloggedin_cmdset: "unloggedin".to_string(),
            session_cmdset: "session".to_string(),
            account_cmdset: "account".to_string(),
            character_cmdset: "character".to_string(),
            system_cmdsets: vec!["system".to_string()],
            max_characters_per_account: 5,
        }
    }
}
