// ── Sandbox: One-Shot Runner ───────────────────────────────────────────────
// Executes one normalized submission inside an ephemeral hardened container:
// build the shell script (base64-embedded source and stdin), create and
// start the container, race its exit against the wall clock, demultiplex
// the captured frames into stdout/stderr, sanitize, and always force-remove
// the container afterwards.

use super::docker::DockerManager;
use super::languages::LanguageCatalog;
use crate::atoms::constants::{
    EXEC_TIMEOUT_MAX_MS, EXEC_TIMEOUT_MIN_MS, EXIT_CODE_TIMEOUT, OUTPUT_TRUNCATE_BYTES,
};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{ExecutionRequest, ExecutionResult, LanguageConfig, LanguageKind};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, ResourcesUlimits};
use bollard::Docker;
use futures::StreamExt;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const BIN_PATH: &str = "./main";

pub struct SandboxRunner {
    docker: Arc<DockerManager>,
    catalog: Arc<LanguageCatalog>,
}

impl SandboxRunner {
    pub fn new(docker: Arc<DockerManager>, catalog: Arc<LanguageCatalog>) -> Self {
        SandboxRunner { docker, catalog }
    }

    pub async fn execute(&self, request: &ExecutionRequest) -> EngineResult<ExecutionResult> {
        let config = self
            .catalog
            .get(&request.language)
            .ok_or_else(|| {
                EngineError::validation(
                    "unsupported_language",
                    format!("language '{}' is not supported", request.language),
                )
            })?
            .clone();

        let docker = self.docker.acquire().await?;
        ensure_image(&docker, &config.image).await?;

        let timeout_ms = request
            .timeout_ms
            .unwrap_or(config.timeout_ms)
            .clamp(EXEC_TIMEOUT_MIN_MS, EXEC_TIMEOUT_MAX_MS);

        let script = build_script(&config, &request.code, request.stdin.as_deref());
        let container_name = format!("exec-{}", uuid::Uuid::new_v4());
        let container_config = container_spec(&config, &script);

        let create_opts = CreateContainerOptions { name: container_name.as_str(), platform: None };
        let container = docker.create_container(Some(create_opts), container_config).await?;
        let container_id = container.id;
        let started = Instant::now();

        let result = self.run_to_completion(&docker, &container_id, timeout_ms).await;

        // Logs are still retrievable after exit (and after a kill).
        let (stdout, stderr) = collect_output(&docker, &container_id).await;
        remove_container(&docker, &container_id).await;

        let execution_time = started.elapsed().as_millis() as u64;
        let (exit_code, timed_out) = result?;

        let output = truncate_output(&sanitize_output(&stdout));
        let mut error = truncate_output(&sanitize_output(&stderr));
        if timed_out {
            error = if error.is_empty() {
                "Execution timed out".into()
            } else {
                format!("Execution timed out\n{error}")
            };
        }

        info!(
            "[runner] {} finished: exit={} timed_out={} in {}ms",
            request.language, exit_code, timed_out, execution_time
        );
        Ok(ExecutionResult {
            success: exit_code == 0 && !timed_out,
            output,
            error,
            exit_code,
            execution_time,
            timestamp: chrono::Utc::now(),
        })
    }

    /// Start the container and race its exit against the wall clock.
    /// Returns `(exit_code, timed_out)`.
    async fn run_to_completion(
        &self,
        docker: &Docker,
        container_id: &str,
        timeout_ms: u64,
    ) -> EngineResult<(i64, bool)> {
        // On a start failure the caller still runs the removal path.
        docker.start_container(container_id, None::<StartContainerOptions<String>>).await?;

        let wait = async {
            let mut stream = docker.wait_container(container_id, None::<WaitContainerOptions<String>>);
            match stream.next().await {
                Some(Ok(response)) => response.status_code,
                _ => -1,
            }
        };

        match tokio::time::timeout(Duration::from_millis(timeout_ms), wait).await {
            Ok(code) => Ok((code, false)),
            Err(_) => {
                warn!("[runner] container {} exceeded {}ms, killing", &container_id[..12], timeout_ms);
                let _ = docker.kill_container::<String>(container_id, None).await;
                Ok((EXIT_CODE_TIMEOUT, true))
            }
        }
    }
}

// ── Image management ───────────────────────────────────────────────────────

/// Pull the image if it is not already present.
async fn ensure_image(docker: &Docker, image: &str) -> EngineResult<()> {
    if docker.inspect_image(image).await.is_ok() {
        return Ok(());
    }
    info!("[runner] pulling image {image}");
    let opts = CreateImageOptions { from_image: image, ..Default::default() };
    let mut stream = docker.create_image(Some(opts), None, None);
    while let Some(progress) = stream.next().await {
        if let Err(e) = progress {
            return Err(EngineError::RuntimeUnavailable(format!(
                "failed to pull image '{image}': {e}"
            )));
        }
    }
    Ok(())
}

async fn remove_container(docker: &Docker, container_id: &str) {
    let opts = RemoveContainerOptions { force: true, ..Default::default() };
    if let Err(e) = docker.remove_container(container_id, Some(opts)).await {
        warn!("[runner] failed to remove container {}: {}", &container_id[..12], e);
    }
}

// ── Script assembly ────────────────────────────────────────────────────────

/// Expand `{src}` / `{bin}` in a command template.
fn apply_template(template: &str, src: &str) -> String {
    template.replace("{src}", src).replace("{bin}", BIN_PATH)
}

/// One `sh -c` invocation: decode source, compile if needed, decode stdin,
/// run. Stdin is piped in with `cat` only when the run command does not
/// already reference `/tmp/` itself.
fn build_script(config: &LanguageConfig, code: &str, stdin: Option<&[u8]>) -> String {
    let filename = LanguageCatalog::source_filename(config);
    let mut steps = vec![format!(
        "echo '{}' | base64 -d > /tmp/{}",
        BASE64.encode(code.as_bytes()),
        filename
    )];

    if matches!(config.kind, LanguageKind::Compiled | LanguageKind::Transpiled) {
        if let Some(compile) = &config.compile_command {
            steps.push(apply_template(compile, &filename));
        }
    }

    let run = apply_template(&config.run_command, &filename);
    match stdin {
        Some(bytes) => {
            steps.push(format!("echo '{}' | base64 -d > /tmp/input.txt", BASE64.encode(bytes)));
            if run.contains("/tmp/") {
                steps.push(run);
            } else {
                steps.push(format!("cat /tmp/input.txt | {run}"));
            }
        }
        None => steps.push(run),
    }

    steps.join(" && ")
}

// ── Container spec ─────────────────────────────────────────────────────────

/// The hardened profile applied to every one-shot container: no network,
/// unprivileged user, tmpfs-only writable paths, dropped capabilities,
/// CPU/memory/PID/fd limits from the language config.
fn container_spec(config: &LanguageConfig, script: &str) -> Config<String> {
    // Compilers need more file descriptors and processes than interpreters.
    let bumped = config.id == "go";
    let (nofile, nproc, pids) = if bumped { (256, 128, 128) } else { (64, 32, 64) };

    let host_config = HostConfig {
        memory: Some(parse_memory_limit(&config.memory_limit)),
        nano_cpus: Some((config.cpu_limit * 1_000_000_000.0) as i64),
        network_mode: Some("none".to_string()),
        pids_limit: Some(pids),
        cap_drop: Some(vec!["ALL".to_string()]),
        security_opt: Some(vec!["no-new-privileges:true".to_string()]),
        tmpfs: Some(HashMap::from([
            ("/tmp".to_string(), "rw,exec,nosuid,size=100m".to_string()),
            ("/var/tmp".to_string(), "rw,noexec,nosuid,size=10m".to_string()),
        ])),
        ulimits: Some(vec![
            ResourcesUlimits {
                name: Some("nofile".to_string()),
                soft: Some(nofile),
                hard: Some(nofile),
            },
            ResourcesUlimits { name: Some("nproc".to_string()), soft: Some(nproc), hard: Some(nproc) },
        ]),
        ..Default::default()
    };

    Config {
        image: Some(config.image.clone()),
        cmd: Some(vec!["sh".to_string(), "-c".to_string(), script.to_string()]),
        user: Some("nobody".to_string()),
        working_dir: Some("/tmp".to_string()),
        env: Some(vec![
            "HOME=/tmp".to_string(),
            "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string(),
        ]),
        host_config: Some(host_config),
        tty: Some(false),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        ..Default::default()
    }
}

/// "256m" → bytes. Falls back to 256 MiB on anything unparseable.
fn parse_memory_limit(limit: &str) -> i64 {
    let limit = limit.trim().to_lowercase();
    let (digits, unit) = limit.split_at(limit.find(|c: char| !c.is_ascii_digit()).unwrap_or(limit.len()));
    let value: i64 = digits.parse().unwrap_or(256);
    match unit {
        "k" | "kb" => value * 1024,
        "m" | "mb" | "" => value * 1024 * 1024,
        "g" | "gb" => value * 1024 * 1024 * 1024,
        _ => 256 * 1024 * 1024,
    }
}

// ── Output handling ────────────────────────────────────────────────────────

/// Drain the demultiplexed log stream into separate stdout/stderr buffers.
/// Frame type 1 is stdout, 2 is stderr; a read error ends collection
/// gracefully with whatever arrived intact.
async fn collect_output(docker: &Docker, container_id: &str) -> (String, String) {
    let opts = LogsOptions::<String> { stdout: true, stderr: true, follow: false, ..Default::default() };
    let mut stdout = String::new();
    let mut stderr = String::new();
    let mut stream = docker.logs(container_id, Some(opts));
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(LogOutput::StdOut { message }) => stdout.push_str(&String::from_utf8_lossy(&message)),
            Ok(LogOutput::StdErr { message }) => stderr.push_str(&String::from_utf8_lossy(&message)),
            Ok(_) => {}
            Err(e) => {
                warn!("[runner] log stream ended early: {e}");
                break;
            }
        }
    }
    (stdout, stderr)
}

/// Strip non-printing control characters, keeping tab/newline/CR.
fn sanitize_output(s: &str) -> String {
    s.chars()
        .filter(|&c| {
            let code = c as u32;
            !matches!(code, 0x00..=0x08 | 0x0B | 0x0C | 0x0E..=0x1F | 0x7F)
        })
        .collect()
}

fn truncate_output(s: &str) -> String {
    crate::atoms::types::truncate_utf8(s, OUTPUT_TRUNCATE_BYTES).to_string()
}
