use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use rand::{Rng, thread_rng};
use regex::Regex;
use tokio::sync::Mutex;
use tracing::debug;
use which::which;

use crate::page::Page;
use crate::transport::Transport;

/// Temporary directory for browser user data, deleted on drop.
struct CustomTempDir {
    path: PathBuf,
}

impl CustomTempDir {
    /// Creates a fresh directory named with a timestamp and random suffix.
    fn new(base: PathBuf, prefix: &str) -> Result<Self> {
        std::fs::create_dir_all(&base)?;
        let name = format!(
            "{}_{}_{}",
            prefix,
            chrono::Local::now().format("%Y%m%d_%H%M%S"),
            thread_rng()
                .sample_iter(&rand::distributions::Alphanumeric)
                .take(6)
                .map(char::from)
                .collect::<String>()
        );
        let path = base.join(name);
        std::fs::create_dir(&path)?;
        Ok(Self { path })
    }
}

impl Drop for CustomTempDir {
    /// Chromium may still hold files briefly after the kill, so retry.
    fn drop(&mut self) {
        for _ in 0..3 {
            if std::fs::remove_dir_all(&self.path).is_ok() {
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// Holds the browser process and its user-data directory.
struct BrowserProcess {
    child: Child,
    _temp: CustomTempDir,
}

impl Drop for BrowserProcess {
    /// Kills and reaps the child before the temp dir is removed.
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A running Chromium instance reachable over CDP.
///
/// Opened once before the job loop and closed once after it; pages created
/// from it share the single transport.
pub struct Browser {
    transport: Arc<Transport>,
    process: Mutex<Option<BrowserProcess>>,
}

impl Browser {
    /// Spawns a browser and connects to its DevTools socket.
    ///
    /// Headless is the normal mode; debug runs pass `false` to watch the
    /// navigation happen.
    pub async fn launch(headless: bool) -> Result<Self> {
        let temp = CustomTempDir::new(std::env::temp_dir().join("webshot"), "profile")?;
        let exe = Self::find_chrome()?;
        let port = (8000..9000)
            .find(|&p| std::net::TcpListener::bind(("127.0.0.1", p)).is_ok())
            .ok_or(anyhow!("No available debugging port"))?;
        debug!(exe = %exe.display(), port, "launching browser");

        let mut args = vec![
            format!("--remote-debugging-port={port}"),
            format!("--user-data-dir={}", temp.path.display()),
            "--no-sandbox".into(),
            "--no-first-run".into(),
            "--no-default-browser-check".into(),
            "--disable-background-networking".into(),
            "--disable-default-apps".into(),
            "--disable-extensions".into(),
            "--disable-sync".into(),
            "--disable-dev-shm-usage".into(),
            "--mute-audio".into(),
            "--hide-scrollbars".into(),
            "--window-size=1920,1080".into(),
        ];
        if headless {
            args.push("--headless=new".into());
        }

        let mut child = Command::new(&exe)
            .args(args)
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start browser \"{}\"", exe.display()))?;
        let stderr = child.stderr.take().context("No stderr from browser")?;
        let ws_url = Self::wait_for_ws(stderr).await?;
        debug!(ws_url, "browser ready");

        Ok(Self {
            transport: Arc::new(Transport::new(&ws_url).await?),
            process: Mutex::new(Some(BrowserProcess { child, _temp: temp })),
        })
    }

    /// Attempts to locate a Chrome or Edge executable on the system.
    fn find_chrome() -> Result<PathBuf> {
        if let Ok(p) = std::env::var("CHROME") {
            return Ok(p.into());
        }
        let apps = [
            "google-chrome-stable",
            "chromium",
            "chrome",
            "msedge",
            "microsoft-edge",
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
        ];
        for app in apps {
            if let Ok(p) = which(app) {
                return Ok(p);
            }
            if Path::new(app).exists() {
                return Ok(app.into());
            }
        }

        #[cfg(windows)]
        {
            use winreg::{RegKey, enums::HKEY_LOCAL_MACHINE};
            let keys = [
                r"SOFTWARE\Microsoft\Windows\CurrentVersion\App Paths\chrome.exe",
                r"SOFTWARE\Microsoft\Windows\CurrentVersion\App Paths\msedge.exe",
            ];
            for k in keys {
                if let Ok(rk) = RegKey::predef(HKEY_LOCAL_MACHINE).open_subkey(k)
                    && let Ok(v) = rk.get_value::<String, _>("")
                {
                    return Ok(v.into());
                }
            }
            let paths = [
                r"C:\Program Files\Google\Chrome\Application\chrome.exe",
                r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
                r"C:\Program Files\Microsoft\Edge\Application\msedge.exe",
                r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
            ];
            for p in paths {
                if Path::new(p).exists() {
                    return Ok(p.into());
                }
            }
        }
        Err(anyhow!("Chrome/Edge not found. Set the CHROME env var."))
    }

    /// Reads browser stderr lines to extract the DevTools WebSocket URL.
    async fn wait_for_ws(stderr: std::process::ChildStderr) -> Result<String> {
        let reader = BufReader::new(stderr);
        let re = Regex::new(r"listening on (ws://.*/devtools/browser/\S*)")?;
        tokio::task::spawn_blocking(move || {
            for line in reader.lines() {
                let l = line?;
                if let Some(cap) = re.captures(&l) {
                    return Ok(cap[1].to_string());
                }
            }
            Err(anyhow!("DevTools WebSocket URL not found in stderr"))
        })
        .await?
    }

    /// Creates a blank page and attaches a session to it.
    pub async fn new_page(&self) -> Result<Page> {
        Page::new(self.transport.clone()).await
    }

    /// Closes the browser and reaps the process.
    pub async fn close(&self) -> Result<()> {
        self.transport.shutdown().await;
        let mut lock = self.process.lock().await;
        // Take triggers Drop: kill, wait, then temp dir removal.
        lock.take();
        Ok(())
    }
}
