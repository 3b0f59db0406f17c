//! API key resolution from the environment.

use secrecy::SecretString;

use crate::{Env, ProviderId};

/// A resolved upstream credential.
///
/// `source` is the name of the environment variable that supplied the key,
/// kept for diagnostics (the debug echo endpoint and log lines report it;
/// the key itself never leaves [`SecretString`] outside header
/// construction).
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    /// The credential itself.
    pub key: SecretString,
    /// Name of the environment variable that supplied it.
    pub source: &'static str,
}

/// Environment variables consulted for a provider, in priority order.
pub fn key_priority(provider: &ProviderId) -> &'static [&'static str] {
    match provider {
        ProviderId::OpenRouter => &["OPENROUTER_API_KEY", "OPENAI_API_KEY", "API_KEY"],
        ProviderId::OpenAi => &["OPENAI_API_KEY", "API_KEY"],
        ProviderId::Together => &["TOGETHER_API_KEY", "API_KEY"],
        ProviderId::DeepSeek => &["DEEPSEEK_API_KEY", "API_KEY"],
        ProviderId::Glm => &["ZAI_API_KEY", "API_KEY"],
        ProviderId::Grok => &["GROQ_API_KEY", "API_KEY"],
        ProviderId::Custom | ProviderId::Other(_) => &["CUSTOM_API_KEY", "API_KEY"],
    }
}

/// Resolve the API key for a provider. First non-empty variable wins.
pub fn resolve_api_key(provider: &ProviderId, env: &Env) -> Option<ResolvedKey> {
    key_priority(provider).iter().find_map(|name| {
        env.get(name).map(|value| ResolvedKey {
            key: SecretString::from(value.to_string()),
            source: name,
        })
    })
}

/// Optional attribution headers a provider wants on every request.
///
/// OpenRouter uses `HTTP-Referer` and `X-Title` to credit the calling
/// application.
pub fn provider_headers(provider: &ProviderId, env: &Env) -> Vec<(&'static str, String)> {
    let mut headers = Vec::new();

    if let ProviderId::OpenRouter = provider {
        if let Some(site) = env.get("OPENROUTER_SITE_URL") {
            headers.push(("HTTP-Referer", site.to_string()));
        }
        if let Some(title) = env.get("OPENROUTER_APP_TITLE") {
            headers.push(("X-Title", title.to_string()));
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn openrouter_priority_order() {
        let env = Env::from_iter([("OPENAI_API_KEY", "sk-openai"), ("API_KEY", "generic")]);

        let resolved = resolve_api_key(&ProviderId::OpenRouter, &env).unwrap();
        assert_eq!(resolved.key.expose_secret(), "sk-openai");
        assert_eq!(resolved.source, "OPENAI_API_KEY");

        let env = Env::from_iter([
            ("OPENROUTER_API_KEY", "sk-or"),
            ("OPENAI_API_KEY", "sk-openai"),
            ("API_KEY", "generic"),
        ]);

        let resolved = resolve_api_key(&ProviderId::OpenRouter, &env).unwrap();
        assert_eq!(resolved.key.expose_secret(), "sk-or");
        assert_eq!(resolved.source, "OPENROUTER_API_KEY");
    }

    #[test]
    fn custom_provider_falls_back_to_generic_key() {
        let env = Env::from_iter([("API_KEY", "generic")]);

        let resolved = resolve_api_key(&ProviderId::Custom, &env).unwrap();
        assert_eq!(resolved.key.expose_secret(), "generic");
        assert_eq!(resolved.source, "API_KEY");
    }

    #[test]
    fn user_defined_provider_uses_custom_priority() {
        let env = Env::from_iter([("CUSTOM_API_KEY", "mine"), ("API_KEY", "generic")]);

        let resolved = resolve_api_key(&ProviderId::Other("acme".into()), &env).unwrap();
        assert_eq!(resolved.source, "CUSTOM_API_KEY");
    }

    #[test]
    fn nothing_set_resolves_to_none() {
        let env = Env::default();
        assert!(resolve_api_key(&ProviderId::OpenRouter, &env).is_none());
    }

    #[test]
    fn empty_values_are_skipped() {
        let env = Env::from_iter([("OPENROUTER_API_KEY", ""), ("API_KEY", "generic")]);

        let resolved = resolve_api_key(&ProviderId::OpenRouter, &env).unwrap();
        assert_eq!(resolved.source, "API_KEY");
    }

    #[test]
    fn openrouter_attribution_headers() {
        let env = Env::from_iter([
            ("OPENROUTER_SITE_URL", "https://example.com"),
            ("OPENROUTER_APP_TITLE", "Example"),
        ]);

        let headers = provider_headers(&ProviderId::OpenRouter, &env);
        assert_eq!(
            headers,
            vec![
                ("HTTP-Referer", "https://example.com".to_string()),
                ("X-Title", "Example".to_string()),
            ]
        );

        assert!(provider_headers(&ProviderId::OpenAi, &env).is_empty());
    }
}
