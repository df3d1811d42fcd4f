use std::path::{Path, PathBuf};

use crate::client::{ClientConfig, DEFAULT_API_URL};
use crate::error::{Error, Result};

pub(crate) const ENV_ACCESS_KEY: &str = "EUM_ACCESS_KEY";
pub(crate) const ENV_API_URL: &str = "EUM_API_URL";
pub(crate) const ENV_RC: &str = "EUMDS_RC";
const RC_FILE_NAME: &str = ".eumdsrc";

#[derive(Debug, Default, PartialEq)]
struct RcConfig {
    url: Option<String>,
    key: Option<String>,
}

/// Resolves the API url and access key, in order of precedence:
/// explicit arguments, `EUM_API_URL` / `EUM_ACCESS_KEY`, then the first rc file
/// found (`EUMDS_RC`, `./.eumdsrc`, `~/.eumdsrc`).
///
/// A missing key is not an error here: it surfaces as [`Error::Auth`] once the
/// client tries to authenticate, so key-less calls such as listing collections work.
pub(crate) fn load_config(url: Option<String>, key: Option<String>) -> Result<ClientConfig> {
    resolve(url, key, |name| std::env::var(name).ok(), rc_candidates)
}

fn resolve<E, C>(
    url: Option<String>,
    key: Option<String>,
    env: E,
    candidates: C,
) -> Result<ClientConfig>
where
    E: Fn(&str) -> Option<String>,
    C: FnOnce(&E) -> Vec<PathBuf>,
{
    let present = |v: &String| !v.trim().is_empty();
    let mut url = url
        .filter(present)
        .or_else(|| env(ENV_API_URL).filter(present));
    let mut key = key
        .filter(present)
        .or_else(|| env(ENV_ACCESS_KEY).filter(present));

    if url.is_none() || key.is_none() {
        for rc_path in candidates(&env) {
            if rc_path.exists() {
                let cfg = read_rc(&rc_path)?;
                if url.is_none() {
                    url = cfg.url;
                }
                if key.is_none() {
                    key = cfg.key;
                }
                tracing::debug!(path = %rc_path.display(), "loaded configuration file");
                break;
            }
        }
    }

    Ok(ClientConfig {
        url: url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        key,
    })
}

fn read_rc(path: &Path) -> Result<RcConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;
    Ok(parse_rc(&text))
}

fn parse_rc(text: &str) -> RcConfig {
    let mut cfg = RcConfig::default();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // `url:` values contain colons themselves, so only split on the first one.
        if let Some((k, v)) = line.split_once(':') {
            let v = strip_quotes(v.trim());
            if v.is_empty() {
                continue;
            }
            match k.trim() {
                "url" => cfg.url = Some(v.to_string()),
                "key" => cfg.key = Some(v.to_string()),
                _ => {}
            }
        }
    }

    cfg
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn rc_candidates<E: Fn(&str) -> Option<String>>(env: &E) -> Vec<PathBuf> {
    if let Some(p) = env(ENV_RC) {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(RC_FILE_NAME));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(RC_FILE_NAME));
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn write_rc(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join(".eumdsrc");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn parse_rc_reads_url_with_colons_and_quotes() {
        let cfg = parse_rc(
            "# comment\nurl: https://api.eumetsat.int/\nkey: \"abc:def\"\nverbose: 1\n",
        );
        assert_eq!(cfg.url.as_deref(), Some("https://api.eumetsat.int/"));
        assert_eq!(cfg.key.as_deref(), Some("abc:def"));
    }

    #[test]
    fn explicit_arguments_win_over_env_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let rc = write_rc(&dir, "url: http://file\nkey: file-key\n");
        let env = env_from(&[(ENV_ACCESS_KEY, "env-key"), (ENV_API_URL, "http://env")]);

        let cfg = resolve(
            Some("http://arg".to_string()),
            Some("arg-key".to_string()),
            env,
            |_| vec![rc.clone()],
        )
        .unwrap();
        assert_eq!(cfg.url, "http://arg");
        assert_eq!(cfg.key.as_deref(), Some("arg-key"));
    }

    #[test]
    fn env_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let rc = write_rc(&dir, "url: http://file\nkey: file-key\n");
        let env = env_from(&[(ENV_ACCESS_KEY, "env-key")]);

        let cfg = resolve(None, None, env, |_| vec![rc.clone()]).unwrap();
        assert_eq!(cfg.url, "http://file");
        assert_eq!(cfg.key.as_deref(), Some("env-key"));
    }

    #[test]
    fn rc_path_from_env_is_the_only_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let rc = write_rc(&dir, "key: from-rc-env\n");
        let env = env_from(&[(ENV_RC, rc.to_str().unwrap())]);

        let cfg = resolve(None, None, env, rc_candidates).unwrap();
        assert_eq!(cfg.key.as_deref(), Some("from-rc-env"));
        assert_eq!(cfg.url, DEFAULT_API_URL);
    }

    #[test]
    fn blank_argument_falls_back_to_env() {
        let env = env_from(&[(ENV_ACCESS_KEY, "env-key"), (ENV_API_URL, "http://env")]);

        let cfg = resolve(
            Some(" ".to_string()),
            Some("  ".to_string()),
            env,
            |_| Vec::new(),
        )
        .unwrap();
        assert_eq!(cfg.url, "http://env");
        assert_eq!(cfg.key.as_deref(), Some("env-key"));
    }

    #[test]
    fn missing_key_is_left_for_authentication() {
        let cfg = resolve(None, Some("   ".to_string()), env_from(&[]), |_| Vec::new()).unwrap();
        assert_eq!(cfg.key, None);
        assert_eq!(cfg.url, DEFAULT_API_URL);
    }
}
