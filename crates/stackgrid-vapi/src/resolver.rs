//! Depth-first traversal and version dedup.

use std::collections::{HashMap, HashSet};

use semver::Version;
use stackgrid_state::{ReleaseId, VapiPackage, VapiRelease};
use tracing::debug;

use crate::error::ResolveError;
use crate::lookup::ReleaseLookup;

/// Post-order walk over the dependency graph.
///
/// With `skip_visited` one visited set is shared by every walk made through
/// this traversal, so a release reachable along several paths (or from
/// several roots) is visited once. Without it, a release is visited once per
/// path. A release reached again while it is still on the current path is a
/// cycle in either mode.
pub struct Traversal<'a, L: ReleaseLookup + ?Sized> {
    lookup: &'a L,
    visited: Option<HashSet<ReleaseId>>,
    path: Vec<ReleaseId>,
}

impl<'a, L: ReleaseLookup + ?Sized> Traversal<'a, L> {
    pub fn new(lookup: &'a L, skip_visited: bool) -> Self {
        Self {
            lookup,
            visited: skip_visited.then(HashSet::new),
            path: Vec::new(),
        }
    }

    /// Walk from `root`, calling `visit(release, parent)` after all of the
    /// release's dependencies. The root's parent is `None`.
    pub fn walk<F>(&mut self, root: &str, visit: &mut F) -> Result<(), ResolveError>
    where
        F: FnMut(&VapiRelease, Option<&VapiRelease>) -> Result<(), ResolveError>,
    {
        let release = self.lookup.release(root)?;
        self.walk_from(release, None, visit)
    }

    fn walk_from<F>(
        &mut self,
        release: VapiRelease,
        parent: Option<&VapiRelease>,
        visit: &mut F,
    ) -> Result<(), ResolveError>
    where
        F: FnMut(&VapiRelease, Option<&VapiRelease>) -> Result<(), ResolveError>,
    {
        if self.path.contains(&release.id) {
            let mut path = self.path.clone();
            path.push(release.id.clone());
            return Err(ResolveError::Cycle { path });
        }
        if let Some(visited) = &mut self.visited {
            if !visited.insert(release.id.clone()) {
                return Ok(());
            }
        }

        self.path.push(release.id.clone());
        for dep_id in &release.dependencies {
            let dep = self.lookup.release(dep_id)?;
            self.walk_from(dep, Some(&release), visit)?;
        }
        self.path.pop();

        visit(&release, parent)
    }
}

/// Walk the graph below `root`. See [`Traversal`].
pub fn dfs<L, F>(lookup: &L, root: &str, skip_visited: bool, mut visit: F) -> Result<(), ResolveError>
where
    L: ReleaseLookup + ?Sized,
    F: FnMut(&VapiRelease, Option<&VapiRelease>) -> Result<(), ResolveError>,
{
    Traversal::new(lookup, skip_visited).walk(root, &mut visit)
}

/// A release with its package and parsed version.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRelease {
    pub release: VapiRelease,
    pub package: VapiPackage,
    pub version: Version,
}

impl ResolvedRelease {
    pub fn major(&self) -> u64 {
        self.version.major
    }
}

/// Every release reachable from `roots` (roots included), keeping only the
/// highest version per (package name, major version).
///
/// Output is in traversal order, so dependencies come before the releases
/// that need them.
pub fn all_dependencies_of<L>(lookup: &L, roots: &[ReleaseId]) -> Result<Vec<ResolvedRelease>, ResolveError>
where
    L: ReleaseLookup + ?Sized,
{
    let mut collected: Vec<VapiRelease> = Vec::new();
    let mut traversal = Traversal::new(lookup, true);
    for root in roots {
        traversal.walk(root, &mut |release, _parent| {
            collected.push(release.clone());
            Ok(())
        })?;
    }

    let mut packages: HashMap<String, VapiPackage> = HashMap::new();
    let mut slots: HashMap<(String, u64), usize> = HashMap::new();
    let mut out: Vec<ResolvedRelease> = Vec::new();

    for release in collected {
        let package = match packages.get(&release.package_id) {
            Some(p) => p.clone(),
            None => {
                let p = lookup.package(&release.package_id)?;
                packages.insert(release.package_id.clone(), p.clone());
                p
            }
        };
        let version = Version::parse(&release.version).map_err(|e| ResolveError::InvalidVersion {
            id: release.id.clone(),
            version: release.version.clone(),
            reason: e.to_string(),
        })?;
        let key = (package.name.clone(), version.major);
        let resolved = ResolvedRelease {
            release,
            package,
            version,
        };

        match slots.get(&key) {
            Some(&idx) => {
                if resolved.version > out[idx].version {
                    debug!(
                        package = %key.0,
                        major = key.1,
                        replaced = %out[idx].version,
                        with = %resolved.version,
                        "deduplicated release"
                    );
                    out[idx] = resolved;
                }
            }
            None => {
                slots.insert(key, out.len());
                out.push(resolved);
            }
        }
    }
    Ok(out)
}
