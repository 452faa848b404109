use std::collections::HashMap;

use mzpeaks::Tolerance;

use mzsic::options::{EvictionPolicy, SpectrumCacheOptions};
use mzsic::progress::AbortFlag;
use mzsic::sic::CollectedSic;
use mzsic::similarity::SimilarIonGrouper;
use mzsic::{
    run_sic_pipeline, ParentIonCandidate, ParentIonTracker, PipelineError, ScanInfo, ScanList,
    SicPipeline, SicPipelineOptions, Spectrum, SpectrumCache,
};

const SURVEY_SCANS: usize = 150;

const FRAGMENTS: &[(f64, f64)] = &[
    (147.11, 120.0),
    (175.12, 80.0),
    (262.15, 300.0),
    (375.24, 150.0),
    (488.32, 60.0),
    (601.41, 210.0),
];

const OTHER_FRAGMENTS: &[(f64, f64)] = &[
    (130.05, 90.0),
    (201.12, 20.0),
    (244.17, 310.0),
    (330.20, 15.0),
    (417.23, 140.0),
    (530.31, 55.0),
];

fn gaussian(height: f64, center: usize, index: usize) -> f64 {
    let d = index as f64 - center as f64;
    height * (-(d * d) / (2.0 * 3.0 * 3.0)).exp()
}

fn survey_spectrum(scan_number: i32, index: usize) -> Spectrum {
    let mut pairs = vec![(300.0, 1.0)];
    for (mz, height, center) in [(500.0, 1e5, 30), (501.003, 5e4, 30), (700.0, 3e4, 15)] {
        let v = gaussian(height, center, index);
        if v > 1.0 {
            pairs.push((mz, v));
        }
    }
    Spectrum::from_pairs(scan_number, &pairs)
}

/// Precursors fragmented after a given survey scan
fn precursors_after(index: usize) -> Vec<(f64, &'static [(f64, f64)])> {
    match index {
        15 => vec![(700.0, OTHER_FRAGMENTS)],
        30 => vec![(500.001, FRAGMENTS)],
        31 => vec![(501.003, FRAGMENTS)],
        32 => vec![(500.002, FRAGMENTS)],
        _ => Vec::new(),
    }
}

fn import(options: &SicPipelineOptions) -> Result<(ScanList, SpectrumCache), PipelineError> {
    let mut cache = SpectrumCache::new(options.cache.clone());
    let tracker = ParentIonTracker::new(&options.sic);
    let mut scans = ScanList::new();
    let mut scan_number = 1;
    for i in 0..SURVEY_SCANS {
        let spectrum = survey_spectrum(scan_number, i);
        let mut info = ScanInfo::new(scan_number, i as f64 * 0.05, 1);
        info.update_from_spectrum(&spectrum);
        cache.put(&spectrum, scan_number)?;
        let survey_index = scans.add_survey_scan(info);
        scan_number += 1;

        for (precursor, fragments) in precursors_after(i) {
            let spectrum = Spectrum::from_pairs(scan_number, fragments);
            let mut info = ScanInfo::new(scan_number, i as f64 * 0.05 + 0.01, 2);
            info.precursor_mz = Some(precursor);
            info.update_from_spectrum(&spectrum);
            cache.put(&spectrum, scan_number)?;
            let frag_index = scans.add_fragmentation_scan(info);
            tracker.add_or_update_parent_ion(
                &mut scans,
                ParentIonCandidate::new(Some(survey_index), precursor, frag_index),
                Some(&mut cache),
            )?;
            scan_number += 1;
        }
    }
    Ok((scans, cache))
}

fn options(folder: &std::path::Path, policy: EvictionPolicy) -> SicPipelineOptions {
    SicPipelineOptions {
        cache: SpectrumCacheOptions {
            folder_path: Some(folder.to_path_buf()),
            spectra_to_retain_in_memory: 100,
            eviction_policy: policy,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test_log::test]
fn test_full_pipeline() -> Result<(), PipelineError> {
    let folder = tempfile::tempdir().unwrap();
    for policy in [EvictionPolicy::Array, EvictionPolicy::LeastRecentlyUsed] {
        let opts = options(folder.path(), policy);
        let (mut scans, mut cache) = import(&opts)?;
        assert_eq!(scans.parent_ions.len(), 4);
        assert!(cache.stats().page_writes > 0);
        assert!(cache.is_paged(1));

        let mut collected: Vec<CollectedSic> = Vec::new();
        let output = run_sic_pipeline(&mut scans, &mut cache, &mut collected, &opts)?;
        assert!(!output.incomplete);
        assert_eq!(output.progress.parent_ions_processed, 4);
        assert_eq!(collected.len(), 4);

        let ions = &scans.parent_ions;
        let (b, mono, isotope, late_mono) = (0, 1, 2, 3);
        assert_eq!(ions[mono].mz, 500.001);
        for i in [mono, isotope, late_mono] {
            assert!(ions[i].sic_stats.peak_found);
            assert_eq!(ions[i].sic_stats.peak_scan_index_max, 30);
        }
        assert!((ions[mono].sic_stats.peak.max_intensity_value - 1e5).abs() < 1e-6);
        assert!((ions[isotope].sic_stats.peak.max_intensity_value - 5e4).abs() < 1e-6);
        assert_eq!(ions[b].sic_stats.peak_scan_index_max, 15);

        let cluster = output
            .similar_ion_clusters
            .iter()
            .find(|c| c.parent_ion_indices.contains(&mono))
            .unwrap();
        let mut members = cluster.parent_ion_indices.clone();
        members.sort();
        assert_eq!(members, vec![mono, isotope, late_mono]);
        assert_eq!(cluster.max_intensity_parent_ion_index, mono);
        assert_eq!(ions[isotope].peak_apex_override_parent_ion_index, Some(mono));
        assert_eq!(ions[late_mono].peak_apex_override_parent_ion_index, Some(mono));
        assert_eq!(ions[b].peak_apex_override_parent_ion_index, None);
        assert_eq!(
            ions[isotope].optimal_peak_apex_scan_number,
            ions[mono].optimal_peak_apex_scan_number
        );

        let clustered = scans.parent_ions.clone();
        let again = SimilarIonGrouper::new(&opts).find_similar_parent_ions(
            &mut scans,
            &mut cache,
            &mut Default::default(),
        )?;
        assert_eq!(again, output.similar_ion_clusters);
        assert_eq!(scans.parent_ions, clustered);
        cache.close();
    }
    Ok(())
}

#[test]
fn test_matches_in_memory_source() -> Result<(), PipelineError> {
    let folder = tempfile::tempdir().unwrap();
    let opts = options(folder.path(), EvictionPolicy::Array);
    let (mut paged_scans, mut cache) = import(&opts)?;

    let mut memory_scans = paged_scans.clone();
    let mut spectra: HashMap<i32, Spectrum> = HashMap::new();
    let numbers: Vec<i32> = memory_scans
        .survey_scans
        .iter()
        .chain(memory_scans.fragmentation_scans.iter())
        .map(|s| s.scan_number)
        .collect();
    for n in numbers {
        let spectrum = cache.get(n, true)?.cloned().unwrap();
        spectra.insert(n, spectrum);
    }

    let paged = run_sic_pipeline(&mut paged_scans, &mut cache, &mut (), &opts)?;
    let memory = run_sic_pipeline(&mut memory_scans, &mut spectra, &mut (), &opts)?;
    assert_eq!(paged, memory);
    assert_eq!(paged_scans.parent_ions, memory_scans.parent_ions);
    Ok(())
}

#[test]
fn test_cancelled_run_is_incomplete() -> Result<(), PipelineError> {
    let folder = tempfile::tempdir().unwrap();
    let opts = options(folder.path(), EvictionPolicy::Array);
    let (mut scans, mut cache) = import(&opts)?;
    let flag = AbortFlag::new();
    flag.abort();
    let output = SicPipeline::new(opts)
        .with_abort_flag(flag)
        .run(&mut scans, &mut cache, &mut ())?;
    assert!(output.incomplete);
    assert!(scans.processing_incomplete);
    assert!(output.similar_ion_clusters.is_empty());
    Ok(())
}

#[test]
fn test_da_tolerance_groups() -> Result<(), PipelineError> {
    let folder = tempfile::tempdir().unwrap();
    let mut opts = options(folder.path(), EvictionPolicy::Array);
    opts.sic = opts.sic.with_tolerance(Tolerance::Da(0.01));
    opts.skip_similarity_grouping = true;
    let (mut scans, mut cache) = import(&opts)?;
    let output = run_sic_pipeline(&mut scans, &mut cache, &mut (), &opts)?;
    assert!(output.similar_ion_clusters.is_empty());
    assert!(scans.parent_ions.iter().all(|p| p.peak_apex_override_parent_ion_index.is_none()));
    assert_eq!(scans.parent_ions[1].sic_stats.peak_scan_index_max, 30);
    Ok(())
}
