//! In-memory manifest graph and its read-only queries

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::{AssetDescriptor, BundleDescriptor, Error, FileNameStyle, Result};

/// Header fields of a manifest, shared by the reader and writer.
#[derive(Debug, Clone)]
pub struct ManifestHeader {
    /// Format version string recorded in the file
    pub format_version: String,
    /// Whether assets may be addressed by their addressable alias
    pub addressable: bool,
    /// Whether assets may be looked up without their file extension
    pub extensionless_lookup: bool,
    /// Naming style for remote bundle file names
    pub output_name_style: FileNameStyle,
    /// Identifier of the pipeline that produced the package
    pub build_pipeline: String,
    /// Package name
    pub package_name: String,
    /// Package version
    pub package_version: String,
    /// Free-form package note
    pub package_note: String,
}

/// Immutable in-memory representation of a package manifest: the asset and
/// bundle lists plus derived lookup indices and reverse dependency edges.
///
/// Construction validates every dependency reference and rejects cyclic
/// bundle dependency data, so queries never have to handle dangling
/// indices.
#[derive(Debug)]
pub struct ManifestGraph {
    header: ManifestHeader,
    bundles: Vec<BundleDescriptor>,
    assets: Vec<AssetDescriptor>,
    /// Logical location (path, address, extensionless path) -> asset index
    locations: HashMap<String, usize>,
    /// Remote file name -> bundle index
    file_names: HashMap<String, usize>,
    /// Content hash -> bundle index
    guids: HashMap<String, usize>,
}

impl ManifestGraph {
    /// Build the graph from freshly deserialized descriptor lists.
    ///
    /// Runs the post-load pass: dependency ID validation, reverse-reference
    /// population, remote file name resolution, lookup index construction,
    /// and cycle rejection.
    pub(crate) fn build(
        header: ManifestHeader,
        mut bundles: Vec<BundleDescriptor>,
        assets: Vec<AssetDescriptor>,
    ) -> Result<Self> {
        let bundle_count = bundles.len();

        // Resolve remote file names before building indices.
        for bundle in &mut bundles {
            bundle.remote_file_name = bundle.resolve_remote_file_name(header.output_name_style);
        }

        // Populate reverse references: who depends on me.
        let mut reverse: Vec<Vec<u32>> = vec![Vec::new(); bundle_count];
        for (id, bundle) in bundles.iter().enumerate() {
            for dep in &bundle.depend_bundle_ids {
                let dep_idx = usize::try_from(*dep).ok().filter(|i| *i < bundle_count);
                let Some(dep_idx) = dep_idx else {
                    return Err(Error::BundleNotFound {
                        index: i64::from(*dep),
                        count: bundle_count,
                    });
                };
                let back_edges = &mut reverse[dep_idx];
                if !back_edges.contains(&(id as u32)) {
                    back_edges.push(id as u32);
                }
            }
        }
        for (bundle, back_edges) in bundles.iter_mut().zip(reverse) {
            bundle.reference_bundle_ids = back_edges;
        }

        reject_cycles(&bundles)?;

        let mut file_names = HashMap::with_capacity(bundle_count);
        let mut guids = HashMap::with_capacity(bundle_count);
        for (id, bundle) in bundles.iter().enumerate() {
            if file_names
                .insert(bundle.remote_file_name.clone(), id)
                .is_some()
            {
                return Err(Error::DuplicateBundleFileName {
                    file_name: bundle.remote_file_name.clone(),
                });
            }
            if guids.insert(bundle.content_hash.clone(), id).is_some() {
                return Err(Error::corrupt(format!(
                    "duplicate bundle content hash: {}",
                    bundle.content_hash
                )));
            }
        }

        let mut locations = HashMap::with_capacity(assets.len() * 2);
        for (id, asset) in assets.iter().enumerate() {
            if asset.bundle_id as usize >= bundle_count {
                return Err(Error::BundleNotFound {
                    index: i64::from(asset.bundle_id),
                    count: bundle_count,
                });
            }
            for dep in &asset.depend_bundle_ids {
                if *dep as usize >= bundle_count {
                    return Err(Error::BundleNotFound {
                        index: i64::from(*dep),
                        count: bundle_count,
                    });
                }
            }

            if locations.insert(asset.asset_path.clone(), id).is_some() {
                return Err(Error::DuplicateAssetPath {
                    path: asset.asset_path.clone(),
                });
            }

            if header.extensionless_lookup {
                if let Some(pos) = asset.asset_path.rfind('.') {
                    let stem = asset.asset_path[..pos].to_string();
                    // A collision on the shortened form only loses the
                    // shortcut, never the real path.
                    if locations.contains_key(&stem) {
                        warn!("extensionless location already taken: {stem}");
                    } else {
                        locations.insert(stem, id);
                    }
                }
            }

            if header.addressable && !asset.address.is_empty() {
                if let Some(previous) = locations.insert(asset.address.clone(), id) {
                    if previous != id {
                        return Err(Error::corrupt(format!(
                            "address collides with another location: {}",
                            asset.address
                        )));
                    }
                }
            }
        }

        debug!(
            package = header.package_name,
            version = header.package_version,
            bundles = bundle_count,
            assets = assets.len(),
            "manifest graph built"
        );

        Ok(Self {
            header,
            bundles,
            assets,
            locations,
            file_names,
            guids,
        })
    }

    /// Manifest header fields.
    pub fn header(&self) -> &ManifestHeader {
        &self.header
    }

    /// All bundles, in manifest order.
    pub fn bundles(&self) -> &[BundleDescriptor] {
        &self.bundles
    }

    /// All assets, in manifest order.
    pub fn assets(&self) -> &[AssetDescriptor] {
        &self.assets
    }

    /// Bundle descriptor by index.
    pub fn bundle(&self, id: u32) -> Option<&BundleDescriptor> {
        self.bundles.get(id as usize)
    }

    /// Look up an asset by logical location: its path, its addressable
    /// alias, or (when enabled) its extensionless path.
    pub fn asset(&self, location: &str) -> Option<&AssetDescriptor> {
        self.locations.get(location).map(|id| &self.assets[*id])
    }

    /// The bundle that contains the given asset.
    pub fn bundle_for_asset(&self, asset: &AssetDescriptor) -> Result<&BundleDescriptor> {
        self.bundles
            .get(asset.bundle_id as usize)
            .ok_or(Error::BundleNotFound {
                index: i64::from(asset.bundle_id),
                count: self.bundles.len(),
            })
    }

    /// Look up a bundle by its remote file name.
    pub fn find_bundle_by_file_name(&self, file_name: &str) -> Option<&BundleDescriptor> {
        self.file_names.get(file_name).map(|id| &self.bundles[*id])
    }

    /// Look up a bundle by its content hash.
    pub fn find_bundle_by_guid(&self, guid: &str) -> Option<&BundleDescriptor> {
        self.guids.get(guid).map(|id| &self.bundles[*id])
    }

    /// The complete transitive dependency closure of an asset, excluding
    /// the asset's own bundle. Duplicate-free, in first-seen order.
    pub fn all_dependencies_of_asset(&self, asset: &AssetDescriptor) -> Vec<&BundleDescriptor> {
        self.closure(&asset.depend_bundle_ids, Some(asset.bundle_id))
    }

    /// The complete transitive dependency closure of a bundle, excluding
    /// the bundle itself. Duplicate-free, in first-seen order.
    pub fn all_dependencies_of_bundle(&self, bundle: &BundleDescriptor) -> Vec<&BundleDescriptor> {
        let own_id = self
            .guids
            .get(&bundle.content_hash)
            .map(|id| *id as u32);
        self.closure(&bundle.depend_bundle_ids, own_id)
    }

    /// All bundles carrying any of the given tags.
    pub fn bundles_with_tags(&self, tags: &[&str]) -> Vec<&BundleDescriptor> {
        self.bundles.iter().filter(|b| b.has_tag(tags)).collect()
    }

    fn closure(&self, seeds: &[u32], exclude: Option<u32>) -> Vec<&BundleDescriptor> {
        let mut seen = vec![false; self.bundles.len()];
        if let Some(id) = exclude {
            if let Some(flag) = seen.get_mut(id as usize) {
                *flag = true;
            }
        }

        let mut order = Vec::new();
        let mut queue: std::collections::VecDeque<u32> = seeds.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            let idx = id as usize;
            if seen[idx] {
                continue;
            }
            seen[idx] = true;
            order.push(&self.bundles[idx]);
            queue.extend(self.bundles[idx].depend_bundle_ids.iter().copied());
        }
        order
    }
}

/// Depth-first scan over the bundle dependency edges. Load fails on the
/// first back edge so queries can recurse freely afterwards.
fn reject_cycles(bundles: &[BundleDescriptor]) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Grey,
        Black,
    }

    let mut marks = vec![Mark::White; bundles.len()];
    for start in 0..bundles.len() {
        if marks[start] != Mark::White {
            continue;
        }

        // Explicit stack: (node, next-child cursor).
        let mut stack = vec![(start, 0usize)];
        marks[start] = Mark::Grey;
        while let Some((node, cursor)) = stack.last_mut() {
            let deps = &bundles[*node].depend_bundle_ids;
            if *cursor >= deps.len() {
                marks[*node] = Mark::Black;
                stack.pop();
                continue;
            }
            let child = deps[*cursor] as usize;
            *cursor += 1;
            match marks[child] {
                Mark::Grey => {
                    return Err(Error::CyclicDependency {
                        bundle_name: bundles[child].bundle_name.clone(),
                    });
                }
                Mark::White => {
                    marks[child] = Mark::Grey;
                    stack.push((child, 0));
                }
                Mark::Black => {}
            }
        }
    }
    Ok(())
}
