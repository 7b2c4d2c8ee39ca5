//! Deploy command support
//!
//! Collects the installation parameters interactively, renders the Kubernetes
//! template set into `<project>/.deploy/`, and hands the result to `kubectl`.
//! Templates come from a GitHub branch archive (cached under the user cache
//! directory) or from a local directory.
//!
//! Templates use `{{ .Field }}` placeholders:
//! ```text
//! image: suborbital/controlplane:{{ .SCCVersion }}
//! storageClassName: {{ .StorageClassName }}
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use regex_lite::{Captures, Regex};
use zip::ZipArchive;

use crate::config::PackagerConfig;
use crate::static_files::walk_files;

/// Directory the rendered manifests are staged in, relative to the project
pub const STAGING_DIR: &str = ".deploy";

/// Template set rendered for a Kubernetes install
pub const TEMPLATE_SET: &str = "scc-k8s";

/// Required length of an environment token
pub const ENV_TOKEN_LEN: usize = 32;

const PLACEHOLDER_PATTERN: &str = r"\{\{\s*\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}";

const INTRO: &str = r#"
Compute Core Installer

BEFORE YOU CONTINUE:
	- You need an environment token for this installation

	- You must have kubectl installed in PATH, connected to the cluster you'd like to use

	- You must be able to set up DNS records for the builder service after this installation completes
		- Choose the DNS name you'd like to use before continuing, e.g. builder.acmeco.com

	- You must know the correct Kubernetes storage class for your cluster (this varies by cloud provider)

Are you ready to continue? (y/N): "#;

/// Values substituted into the templates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployData {
    pub scc_version: String,
    pub env_token: String,
    pub builder_domain: String,
    pub storage_class_name: String,
}

impl DeployData {
    fn fields(&self) -> BTreeMap<&'static str, &str> {
        BTreeMap::from([
            ("SCCVersion", self.scc_version.as_str()),
            ("EnvToken", self.env_token.as_str()),
            ("BuilderDomain", self.builder_domain.as_str()),
            ("StorageClassName", self.storage_class_name.as_str()),
        ])
    }
}

/// Flags of the deploy command
#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub dry_run: bool,
    pub branch: String,
    /// Local template directory; skips the download when set
    pub templates: Option<PathBuf>,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            branch: "main".to_string(),
            templates: None,
        }
    }
}

/// Line-oriented prompts over any reader/writer pair
pub struct Prompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Print `question` and read one trimmed line
    pub fn ask(&mut self, question: &str) -> Result<String> {
        write!(self.output, "{}", question).context("Failed to write prompt")?;
        self.output.flush().context("Failed to flush prompt")?;

        let mut line = String::new();
        self.input
            .read_line(&mut line)
            .context("Failed to read from stdin")?;
        Ok(line.trim().to_string())
    }
}

pub fn validate_env_token(token: &str) -> Result<()> {
    if token.chars().count() != ENV_TOKEN_LEN {
        anyhow::bail!("token must be {} characters in length", ENV_TOKEN_LEN);
    }
    Ok(())
}

pub fn validate_builder_domain(domain: &str) -> Result<()> {
    if domain.is_empty() {
        anyhow::bail!("domain must not be empty");
    }
    Ok(())
}

pub fn validate_storage_class(storage_class: &str) -> Result<()> {
    if storage_class.is_empty() {
        anyhow::bail!("storage class must not be empty");
    }
    Ok(())
}

/// Ask for confirmation and the three installation parameters
pub fn collect_deploy_data<R: BufRead, W: Write>(prompt: &mut Prompt<R, W>) -> Result<DeployData> {
    let answer = prompt.ask(INTRO)?;
    if !answer.eq_ignore_ascii_case("y") {
        anyhow::bail!("aborting");
    }

    let env_token = prompt.ask("Enter your environment token: ")?;
    validate_env_token(&env_token).context("Invalid environment token")?;

    let builder_domain =
        prompt.ask("Enter the domain name that will be used for the builder service: ")?;
    validate_builder_domain(&builder_domain).context("Invalid builder domain")?;

    let storage_class_name = prompt.ask("Enter the Kubernetes storage class to use: ")?;
    validate_storage_class(&storage_class_name).context("Invalid storage class")?;

    Ok(DeployData {
        scc_version: "latest".to_string(),
        env_token,
        builder_domain,
        storage_class_name,
    })
}

/// Replace every `{{ .Field }}` in `template`
///
/// Unknown fields are an error so a typo never reaches the cluster.
pub fn render_template(template: &str, data: &DeployData) -> Result<String> {
    let re = Regex::new(PLACEHOLDER_PATTERN).context("Invalid placeholder pattern")?;
    let fields = data.fields();

    if let Some(unknown) = re
        .captures_iter(template)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .find(|name| !fields.contains_key(name))
    {
        return Err(anyhow!("unknown template field {:?}", unknown));
    }

    let rendered = re.replace_all(template, |caps: &Captures| {
        fields.get(&caps[1]).copied().unwrap_or_default().to_string()
    });

    Ok(rendered.into_owned())
}

/// Render every file of `templates/<set>` into `target`, keeping relative paths
pub fn render_template_dir(
    templates: &Path,
    set: &str,
    target: &Path,
    data: &DeployData,
) -> Result<Vec<PathBuf>> {
    let source = templates.join(set);
    if !source.is_dir() {
        anyhow::bail!("Template set {:?} not found in {:?}", set, templates);
    }

    let mut written = Vec::new();
    for (relative, path) in walk_files(&source)? {
        let destination = target.join(&relative);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let template = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read template {:?}", path))?;
        let rendered = render_template(&template, data)
            .with_context(|| format!("Failed to render template {:?}", path))?;
        fs::write(&destination, rendered)
            .with_context(|| format!("Failed to write {:?}", destination))?;

        tracing::debug!("Rendered {:?}", destination);
        written.push(destination);
    }

    Ok(written)
}

/// Start from an empty staging directory
pub fn prepare_staging_dir(root: &Path) -> Result<PathBuf> {
    let staging = root.join(STAGING_DIR);
    if staging.exists() {
        fs::remove_dir_all(&staging)
            .with_context(|| format!("Failed to clear {:?}", staging))?;
    }
    fs::create_dir_all(&staging).with_context(|| format!("Failed to create {:?}", staging))?;
    Ok(staging)
}

/// Download the template archive for `branch` and return its `templates` directory
pub async fn update_templates(
    cache_dir: &Path,
    repo: &str,
    branch: &str,
    timeout: Duration,
) -> Result<PathBuf> {
    let url = format!("https://github.com/{}/archive/refs/heads/{}.zip", repo, branch);
    tracing::info!("Downloading templates from {}", url);

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")?;
    let bytes = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("Failed to download {}", url))?
        .error_for_status()
        .with_context(|| format!("Template download rejected: {}", url))?
        .bytes()
        .await
        .context("Failed to read template archive")?;

    let target = cache_dir.join("templates").join(branch.replace('/', "_"));
    if target.exists() {
        fs::remove_dir_all(&target).with_context(|| format!("Failed to clear {:?}", target))?;
    }
    fs::create_dir_all(&target).with_context(|| format!("Failed to create {:?}", target))?;

    let count = extract_archive(&bytes, &target)?;
    tracing::debug!("Extracted {} template files into {:?}", count, target);

    Ok(target.join("templates"))
}

/// Extract a branch archive, dropping its single top-level directory
fn extract_archive(zip_bytes: &[u8], target: &Path) -> Result<usize> {
    let mut archive =
        ZipArchive::new(Cursor::new(zip_bytes)).context("Failed to read template archive")?;

    let mut count = 0;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let Some(enclosed) = file.enclosed_name() else {
            tracing::warn!("Skipping unsafe archive entry {:?}", file.name());
            continue;
        };

        let relative: PathBuf = enclosed.components().skip(1).collect();
        if relative.as_os_str().is_empty() {
            continue;
        }

        let path = target.join(&relative);
        if file.is_dir() {
            fs::create_dir_all(&path)?;
            continue;
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&path)
            .with_context(|| format!("Failed to create {:?}", path))?;
        std::io::copy(&mut file, &mut out)?;
        count += 1;
    }

    Ok(count)
}

/// Apply the staged manifests with kubectl
pub fn apply_manifests(root: &Path, namespace: &str) -> Result<()> {
    // The namespace may already exist, so only the apply result matters.
    let created = Command::new("kubectl")
        .args(["create", "ns", namespace])
        .current_dir(root)
        .output();
    if let Err(err) = created {
        tracing::debug!("kubectl create ns failed: {}", err);
    }

    let output = Command::new("kubectl")
        .args(["apply", "-f", &format!("{}/", STAGING_DIR)])
        .current_dir(root)
        .output()
        .context("Failed to run kubectl")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("kubectl apply failed:\n{}", stderr));
    }

    Ok(())
}

/// What a deploy run left behind
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub staging_dir: PathBuf,
    pub files: Vec<PathBuf>,
    pub applied: bool,
}

/// Run the deploy flow for the project at `root`
pub async fn run_deploy<R: BufRead, W: Write>(
    config: &PackagerConfig,
    root: &Path,
    options: &DeployOptions,
    prompt: &mut Prompt<R, W>,
) -> Result<DeployOutcome> {
    let data = collect_deploy_data(prompt)?;

    tracing::info!("Preparing deployment");
    let staging_dir = prepare_staging_dir(root)?;

    let templates = match &options.templates {
        Some(dir) => dir.clone(),
        None => update_templates(
            &config.cache_dir,
            &config.templates_repo,
            &options.branch,
            config.release_check_timeout.max(Duration::from_secs(30)),
        )
        .await
        .context("Failed to update templates")?,
    };

    let files = render_template_dir(&templates, TEMPLATE_SET, &staging_dir, &data)
        .context("Failed to render deploy templates")?;
    tracing::info!("Ready to start installation ({} manifests)", files.len());

    if options.dry_run {
        tracing::info!("Aborting due to dry-run, manifest files left in {}", STAGING_DIR);
        return Ok(DeployOutcome {
            staging_dir,
            files,
            applied: false,
        });
    }

    tracing::info!("Installing...");
    apply_manifests(root, &config.deploy_namespace)?;
    tracing::info!("Installation complete!");

    Ok(DeployOutcome {
        staging_dir,
        files,
        applied: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    const TOKEN: &str = "0123456789abcdef0123456789abcdef";

    fn data() -> DeployData {
        DeployData {
            scc_version: "latest".to_string(),
            env_token: TOKEN.to_string(),
            builder_domain: "builder.acmeco.com".to_string(),
            storage_class_name: "standard".to_string(),
        }
    }

    fn prompt(answers: &str) -> Prompt<Cursor<Vec<u8>>, Vec<u8>> {
        Prompt::new(Cursor::new(answers.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn test_validation_rules() {
        assert!(validate_env_token(TOKEN).is_ok());
        assert!(validate_env_token("short").is_err());
        assert!(validate_env_token(&format!("{}x", TOKEN)).is_err());
        assert!(validate_builder_domain("").is_err());
        assert!(validate_storage_class("").is_err());
        assert!(validate_storage_class("gp2").is_ok());
    }

    #[test]
    fn test_collect_deploy_data() {
        let mut prompt = prompt(&format!("y\n{}\nbuilder.acmeco.com\nstandard\n", TOKEN));
        let collected = collect_deploy_data(&mut prompt).unwrap();
        assert_eq!(collected, data());

        let shown = String::from_utf8(prompt.output).unwrap();
        assert!(shown.contains("Enter your environment token: "));
    }

    #[test]
    fn test_collect_aborts_without_acceptance() {
        let mut prompt = prompt("n\n");
        let err = collect_deploy_data(&mut prompt).unwrap_err();
        assert_eq!(err.to_string(), "aborting");
    }

    #[test]
    fn test_collect_rejects_bad_token() {
        let mut prompt = prompt("Y\ntooshort\nbuilder.acmeco.com\nstandard\n");
        let err = collect_deploy_data(&mut prompt).unwrap_err();
        assert!(format!("{:#}", err).contains("32 characters"));
    }

    #[test]
    fn test_render_template() {
        let rendered = render_template(
            "token: {{ .EnvToken }}\ndomain: {{.BuilderDomain}}\nclass: {{ .StorageClassName }}",
            &data(),
        )
        .unwrap();
        assert_eq!(
            rendered,
            format!("token: {}\ndomain: builder.acmeco.com\nclass: standard", TOKEN)
        );

        let err = render_template("{{ .Nope }}", &data()).unwrap_err();
        assert!(err.to_string().contains("Nope"));
    }

    #[test]
    fn test_render_control_plane_image_tag() {
        let rendered = render_template("image: suborbital/scc:{{ .SCCVersion }}", &data()).unwrap();
        assert_eq!(rendered, "image: suborbital/scc:latest");
        assert!(render_template("{{ .Version }}", &data()).is_err());
    }

    #[test]
    fn test_render_template_dir_and_staging() {
        let tmp = TempDir::new().unwrap();
        let templates = tmp.path().join("templates");
        fs::create_dir_all(templates.join("scc-k8s/storage")).unwrap();
        fs::write(templates.join("scc-k8s/core.yaml"), "image: core:{{ .SCCVersion }}").unwrap();
        fs::write(
            templates.join("scc-k8s/storage/pvc.yaml"),
            "storageClassName: {{ .StorageClassName }}",
        )
        .unwrap();

        let project = tmp.path().join("project");
        fs::create_dir_all(project.join(STAGING_DIR)).unwrap();
        fs::write(project.join(STAGING_DIR).join("stale.yaml"), "old").unwrap();

        let staging = prepare_staging_dir(&project).unwrap();
        assert!(!staging.join("stale.yaml").exists());

        let files = render_template_dir(&templates, TEMPLATE_SET, &staging, &data()).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(
            fs::read_to_string(staging.join("core.yaml")).unwrap(),
            "image: core:latest"
        );
        assert_eq!(
            fs::read_to_string(staging.join("storage/pvc.yaml")).unwrap(),
            "storageClassName: standard"
        );

        assert!(render_template_dir(&templates, "compose", &staging, &data()).is_err());
    }

    #[test]
    fn test_extract_archive_strips_top_level() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.add_directory("repo-main/", options).unwrap();
        writer.start_file("repo-main/templates/scc-k8s/core.yaml", options).unwrap();
        writer.write_all(b"image: core").unwrap();
        writer.start_file("repo-main/README.md", options).unwrap();
        writer.write_all(b"readme").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let tmp = TempDir::new().unwrap();
        let count = extract_archive(&bytes, tmp.path()).unwrap();

        assert_eq!(count, 2);
        assert_eq!(
            fs::read_to_string(tmp.path().join("templates/scc-k8s/core.yaml")).unwrap(),
            "image: core"
        );
    }

    #[tokio::test]
    async fn test_dry_run_with_local_templates() {
        let tmp = TempDir::new().unwrap();
        let templates = tmp.path().join("templates");
        fs::create_dir_all(templates.join("scc-k8s")).unwrap();
        fs::write(templates.join("scc-k8s/core.yaml"), "domain: {{ .BuilderDomain }}").unwrap();
        let project = tmp.path().join("project");
        fs::create_dir_all(&project).unwrap();

        let mut config = PackagerConfig::from_env();
        config.cache_dir = tmp.path().join("cache");
        let options = DeployOptions {
            dry_run: true,
            templates: Some(templates),
            ..DeployOptions::default()
        };
        let mut prompt = prompt(&format!("y\n{}\nbuilder.acmeco.com\nstandard\n", TOKEN));

        let outcome = run_deploy(&config, &project, &options, &mut prompt).await.unwrap();

        assert!(!outcome.applied);
        assert_eq!(outcome.staging_dir, project.join(STAGING_DIR));
        assert_eq!(
            fs::read_to_string(project.join(".deploy/core.yaml")).unwrap(),
            "domain: builder.acmeco.com"
        );
    }
}
