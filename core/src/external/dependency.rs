use std::io;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ProgramError;

/// A file that crosses the boundary of a task's working directory.
///
/// When staging, `source` is a persistent path and `destination` is the name inside
/// the working directory. When collecting outputs the roles flip: `source` is the
/// artifact inside the working directory and `destination` is where it is kept.
/// In both cases the in-sandbox side must be a relative path without `..`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileDependency {
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl FileDependency {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// Stage `source` under its own file name.
    pub fn input(source: impl Into<PathBuf>) -> Self {
        let source = source.into();
        let destination = source.file_name().map(PathBuf::from).unwrap_or_default();
        Self {
            source,
            destination,
        }
    }

    /// Copy `source` into `dir` as `destination`. Returns the staged path.
    pub async fn stage_into(&self, dir: &Path, overwrite: bool) -> Result<PathBuf, ProgramError> {
        let staging = |error| ProgramError::Staging {
            from: self.source.clone(),
            to: dir.join(&self.destination),
            error,
        };
        let to = sandboxed(dir, &self.destination).map_err(staging)?;
        copy_file(&self.source, &to, overwrite)
            .await
            .map_err(staging)?;
        tracing::debug!(from = %self.source.display(), to = %to.display(), "staged requirement");
        Ok(to)
    }

    /// Copy `source` out of `dir` to `destination`. Returns the destination path.
    pub async fn collect_from(&self, dir: &Path, overwrite: bool) -> Result<PathBuf, ProgramError> {
        let extraction = |error| ProgramError::Extraction {
            from: dir.join(&self.source),
            to: self.destination.clone(),
            error,
        };
        let from = sandboxed(dir, &self.source).map_err(extraction)?;
        copy_file(&from, &self.destination, overwrite)
            .await
            .map_err(extraction)?;
        tracing::debug!(from = %from.display(), to = %self.destination.display(), "collected output");
        Ok(self.destination.clone())
    }
}

fn sandboxed(dir: &Path, rel: &Path) -> io::Result<PathBuf> {
    let inside = !rel.as_os_str().is_empty()
        && rel
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !inside {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a relative path inside the working directory", rel.display()),
        ));
    }
    Ok(dir.join(rel))
}

async fn copy_file(from: &Path, to: &Path, overwrite: bool) -> io::Result<()> {
    if !overwrite && tokio::fs::try_exists(to).await? {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "destination exists and overwrite is disabled",
        ));
    }
    if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(from, to).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    #[test]
    fn input_uses_source_file_name() {
        let dep = FileDependency::input("/data/runs/benzene.xyz");
        assert_eq!(dep.destination, PathBuf::from("benzene.xyz"));
    }

    #[tokio::test]
    async fn stages_into_nested_destination() {
        let src_dir = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("mol.xyz");
        std::fs::write(&src, "3\nwater\n").unwrap();

        let dep = FileDependency::new(&src, "inputs/geom.xyz");
        let staged = dep.stage_into(work.path(), true).await.unwrap();

        assert_eq!(staged, work.path().join("inputs/geom.xyz"));
        assert_eq!(std::fs::read_to_string(staged).unwrap(), "3\nwater\n");
    }

    #[tokio::test]
    async fn refuses_to_overwrite_when_disabled() {
        let src_dir = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("a.inp");
        std::fs::write(&src, "new").unwrap();
        std::fs::write(work.path().join("a.inp"), "old").unwrap();

        let err = FileDependency::input(&src)
            .stage_into(work.path(), false)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), FailureKind::Staging);
        assert_eq!(std::fs::read_to_string(work.path().join("a.inp")).unwrap(), "old");
    }

    #[tokio::test]
    async fn missing_source_is_a_staging_failure() {
        let work = tempfile::tempdir().unwrap();
        let err = FileDependency::new("/no/such/input.gjf", "input.gjf")
            .stage_into(work.path(), true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Staging);
        assert!(err.to_string().contains("/no/such/input.gjf"));
    }

    #[tokio::test]
    async fn paths_escaping_the_sandbox_are_rejected() {
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();

        let err = FileDependency::new("../secret", out.path().join("secret"))
            .collect_from(work.path(), true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Extraction);

        let err = FileDependency::new("/etc/hostname", "/abs/dest")
            .stage_into(work.path(), true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Staging);
    }

    #[tokio::test]
    async fn collects_output_to_destination() {
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(work.path().join("result.out"), "E = -76.02").unwrap();

        let dest = out.path().join("kept/result.out");
        let collected = FileDependency::new("result.out", &dest)
            .collect_from(work.path(), true)
            .await
            .unwrap();

        assert_eq!(collected, dest);
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "E = -76.02");
    }
}
