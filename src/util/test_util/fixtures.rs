// Not every test uses every fixture.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use crate::code::{
    ArtifactIdentity, CodeCache, CodeRegions, CompiledArtifact, EntryPoints, OopsDoProcessor,
    RegionKind,
};
use crate::codegen::ArtifactBlueprint;
use crate::compiler::{CompLevel, CompileId};
use crate::method::{Method, MethodId, MethodRef};

/// The size of the stubs region of every fixture blueprint.
pub const STUBS_BYTES: usize = 16;

fn regions(insts_bytes: usize) -> CodeRegions {
    let mut insts = vec![0x90u8; insts_bytes];
    if let Some(last) = insts.last_mut() {
        *last = 0xc3;
    }
    CodeRegions::builder()
        .region(RegionKind::Insts, insts)
        .and_then(|b| b.region(RegionKind::Stubs, vec![0xccu8; STUBS_BYTES]))
        .unwrap()
        .build()
}

/// A valid standard blueprint with `insts_bytes` bytes of instructions and two oops.
pub fn blueprint(insts_bytes: usize) -> ArtifactBlueprint {
    let mut bp = ArtifactBlueprint::new(
        regions(insts_bytes),
        EntryPoints {
            entry: 0,
            verified_entry: 0,
            osr_entry: None,
        },
        64,
    );
    bp.oops = vec![0x1000, 0x2000];
    bp
}

/// Like [`blueprint`], with an OSR entry point.
pub fn osr_blueprint(insts_bytes: usize) -> ArtifactBlueprint {
    let mut bp = blueprint(insts_bytes);
    bp.entry_points.osr_entry = Some(0);
    bp
}

pub fn artifact_for(
    method: &MethodRef,
    compile_id: CompileId,
    comp_level: CompLevel,
    osr_bci: Option<u32>,
    blueprint: ArtifactBlueprint,
) -> CompiledArtifact {
    CompiledArtifact::new(
        ArtifactIdentity {
            compile_id,
            method: method.clone(),
            comp_level,
            osr_bci,
        },
        blueprint,
    )
    .unwrap()
}

/// A code cache with `count` in-use artifacts, each for a different method.
pub fn installed_artifacts(count: usize) -> (CodeCache, Vec<Arc<CompiledArtifact>>) {
    let cache = CodeCache::new(1 << 24);
    let artifacts = (0..count)
        .map(|i| {
            let method = Method::new(MethodId(i as u64 + 1), format!("Fixture.m{}", i), 16);
            cache
                .install(artifact_for(
                    &method,
                    i as CompileId + 1,
                    CompLevel::Simple,
                    None,
                    blueprint(32),
                ))
                .unwrap()
        })
        .collect();
    (cache, artifacts)
}

/// Counts how often each artifact was processed.
#[derive(Default, Debug)]
pub struct CountingProcessor {
    counts: HashMap<usize, (usize, usize)>,
}

impl CountingProcessor {
    fn key(artifact: &CompiledArtifact) -> usize {
        artifact as *const CompiledArtifact as usize
    }

    pub fn regular(&self, artifact: &CompiledArtifact) -> usize {
        self.counts.get(&Self::key(artifact)).map_or(0, |c| c.0)
    }

    pub fn remaining_strong(&self, artifact: &CompiledArtifact) -> usize {
        self.counts.get(&Self::key(artifact)).map_or(0, |c| c.1)
    }

    /// The number of processing steps of any kind, over all artifacts.
    pub fn total(&self) -> usize {
        self.counts.values().map(|(r, s)| r + s).sum()
    }

    /// Add the counts of a processor used by another thread.
    pub fn merge(&mut self, other: CountingProcessor) {
        for (key, (r, s)) in other.counts {
            let entry = self.counts.entry(key).or_default();
            entry.0 += r;
            entry.1 += s;
        }
    }
}

impl OopsDoProcessor for CountingProcessor {
    fn do_regular_processing(&mut self, artifact: &CompiledArtifact) {
        self.counts.entry(Self::key(artifact)).or_default().0 += 1;
    }

    fn do_remaining_strong_processing(&mut self, artifact: &CompiledArtifact) {
        self.counts.entry(Self::key(artifact)).or_default().1 += 1;
    }
}
