use super::*;

/// Env mutation is confined to the single `from_env_round_trip` test below,
/// so no concurrently running test can observe a half-mutated environment.
unsafe fn clear_chat_env() {
    unsafe {
        std::env::remove_var("CHAT_API_BASE_URL");
        std::env::remove_var("CHAT_HUB_URL");
        std::env::remove_var("CHAT_ASSISTANT_CONVERSATION_ID");
        std::env::remove_var("CHAT_PAGE_SIZE");
        std::env::remove_var("CHAT_REQUEST_TIMEOUT_SECS");
        std::env::remove_var("CHAT_CONNECT_TIMEOUT_SECS");
        std::env::remove_var("CHAT_ASSISTANT_TIMEOUT_SECS");
        std::env::remove_var("CHAT_RECONNECT_BASE_MS");
        std::env::remove_var("CHAT_RECONNECT_CAP_MS");
        std::env::remove_var("CHAT_TYPING_IDLE_MS");
    }
}

#[test]
fn new_applies_defaults_and_trims_base() {
    let cfg = ChatConfig::new("https://api.example.test/", "wss://hub.example.test/chat");
    assert_eq!(cfg.api_base_url, "https://api.example.test");
    assert_eq!(cfg.hub_url, "wss://hub.example.test/chat");
    assert_eq!(cfg.page_size, DEFAULT_PAGE_SIZE);
    assert_eq!(cfg.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
    assert_eq!(cfg.assistant_timeout_secs, DEFAULT_ASSISTANT_TIMEOUT_SECS);
    assert_eq!(cfg.typing_idle_ms, DEFAULT_TYPING_IDLE_MS);
    assert!(cfg.assistant_conversation_id.is_none());
}

#[test]
fn from_env_round_trip() {
    unsafe {
        clear_chat_env();
    }

    // Missing required vars is an error.
    assert!(matches!(ChatConfig::from_env(), Err(ConfigError::MissingVar("CHAT_API_BASE_URL"))));

    unsafe {
        std::env::set_var("CHAT_API_BASE_URL", "https://api.example.test/");
        std::env::set_var("CHAT_HUB_URL", "wss://hub.example.test/chat");
        std::env::set_var("CHAT_ASSISTANT_CONVERSATION_ID", "assistant");
        std::env::set_var("CHAT_PAGE_SIZE", "25");
        std::env::set_var("CHAT_REQUEST_TIMEOUT_SECS", "5");
        std::env::set_var("CHAT_TYPING_IDLE_MS", "not-a-number");
    }

    let cfg = ChatConfig::from_env().unwrap();
    assert_eq!(cfg.api_base_url, "https://api.example.test");
    assert_eq!(cfg.assistant_conversation_id.as_deref(), Some("assistant"));
    assert_eq!(cfg.page_size, 25);
    assert_eq!(cfg.request_timeout_secs, 5);
    // Unparseable values fall back to the default.
    assert_eq!(cfg.typing_idle_ms, DEFAULT_TYPING_IDLE_MS);
    // Untouched values keep their defaults.
    assert_eq!(cfg.reconnect_base_ms, DEFAULT_RECONNECT_BASE_MS);

    unsafe { clear_chat_env() };
}
