//! Merge freshly built records into the store.
//!
//! A slug that is absent, or present but never successfully analyzed, goes
//! through face analysis. A slug that already carries an analysis result only
//! has its dataset-derived fields refreshed, so dataset edits propagate
//! without calling the (rate-limited) face service again.

use indicatif::{ProgressBar, ProgressStyle};

use crate::dataset::ArtworkRow;
use crate::faces::{self, FaceAnalyzer};
use crate::images::ImageLayout;
use crate::record::builder::{self, BuildError};
use crate::record::{Analysis, ArtworkInfo, ArtworkRecord};
use crate::store::ArtworkStore;

/// What the merger did with one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAction {
    /// New slug, analysis completed.
    Added,
    /// New slug, analysis failed; stored for retry.
    AddedPending,
    /// Existing pending slug, analysis completed on retry.
    Analyzed,
    /// Existing pending slug, analysis failed again.
    StillPending,
    /// Existing analyzed slug, dataset fields overwritten.
    Refreshed,
}

#[derive(Debug, Default, PartialEq)]
pub struct MergeResult {
    pub rows: u64,
    pub skipped: u64,
    pub failed: u64,
    pub added: u64,
    pub retried: u64,
    pub refreshed: u64,
    pub analyzed: u64,
    pub analysis_failed: u64,
}

impl MergeResult {
    fn record(&mut self, action: MergeAction) {
        match action {
            MergeAction::Added => {
                self.added += 1;
                self.analyzed += 1;
            }
            MergeAction::AddedPending => {
                self.added += 1;
                self.analysis_failed += 1;
            }
            MergeAction::Analyzed => {
                self.retried += 1;
                self.analyzed += 1;
            }
            MergeAction::StillPending => {
                self.retried += 1;
                self.analysis_failed += 1;
            }
            MergeAction::Refreshed => self.refreshed += 1,
        }
    }
}

/// Merge one built record into the store.
pub fn merge_record(
    store: &mut ArtworkStore,
    info: ArtworkInfo,
    layout: &ImageLayout,
    analyzer: &dyn FaceAnalyzer,
) -> MergeAction {
    if let Some(existing) = store.get_mut(&info.slug) {
        if existing.is_analyzed() {
            log::debug!("Updating fields from dataset: {}", info.slug);
            existing.refresh(info);
            return MergeAction::Refreshed;
        }
    }

    let slug = info.slug.clone();
    log::info!("Processing: {slug}");
    let analysis = faces::enrich(analyzer, &layout.hd(&slug));
    let succeeded = analysis.is_some();

    let previous = store.get(&slug);
    let was_present = previous.is_some();
    let mut record = ArtworkRecord::new(info);
    record.dominant_color = previous.and_then(|p| p.dominant_color.clone());
    record.analysis = analysis.map_or(Analysis::Pending, Analysis::Analyzed);
    store.insert(record);

    match (was_present, succeeded) {
        (false, true) => MergeAction::Added,
        (false, false) => MergeAction::AddedPending,
        (true, true) => MergeAction::Analyzed,
        (true, false) => MergeAction::StillPending,
    }
}

/// Build every row and merge it into the store.
///
/// Rows without an HD image are skipped; rows that fail to build are logged
/// and skipped. Neither stops the pass.
pub fn merge_rows(
    store: &mut ArtworkStore,
    rows: &[ArtworkRow],
    layout: &ImageLayout,
    analyzer: &dyn FaceAnalyzer,
) -> MergeResult {
    let pb = ProgressBar::new(rows.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap()
        .progress_chars("#>-"),
    );
    pb.set_message("Merging...");

    let mut result = MergeResult::default();

    for row in rows {
        result.rows += 1;
        match builder::build(row, layout) {
            Ok(Some(info)) => {
                let action = merge_record(store, info, layout, analyzer);
                result.record(action);
            }
            Ok(None) => result.skipped += 1,
            Err(e) => {
                log_build_error(&e);
                result.failed += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_with_message(format!(
        "Done: {} new, {} retried, {} refreshed, {} skipped, {} failed",
        result.added, result.retried, result.refreshed, result.skipped, result.failed
    ));
    result
}

fn log_build_error(e: &BuildError) {
    match e {
        BuildError::Image { .. } => log::warn!("Skipping row with unreadable image: {e}"),
        BuildError::InvalidNumber { .. } => log::warn!("Skipping row: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::*;
    use crate::faces::tests::{MockAnalyzer, one_face};
    use crate::record::{FaceAnalysis, FaceRect};
    use crate::slug::slug;
    use image::{Rgb, RgbImage};
    use std::path::Path;

    struct Fixture {
        _dir: tempfile::TempDir,
        layout: ImageLayout,
        store_path: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let layout = ImageLayout::new(&dir.path().join("imgs"), &dir.path().join("web"));
        layout.create_dirs().unwrap();
        let store_path = layout.store_file();
        Fixture { _dir: dir, layout, store_path }
    }

    fn row(artist: &str, title: &str, year: &str) -> ArtworkRow {
        [
            (COL_ARTIST, artist),
            (COL_TITLE, title),
            (COL_YEAR, year),
            (COL_WIDTH_CM, "50"),
            (COL_HEIGHT_CM, "60"),
        ]
        .into_iter()
        .collect()
    }

    fn write_hd(layout: &ImageLayout, artist: &str, title: &str, w: u32, h: u32) {
        RgbImage::from_pixel(w, h, Rgb([90, 90, 90]))
            .save(layout.hd(&slug(artist, title)))
            .unwrap();
    }

    fn hd_name(artist: &str, title: &str) -> String {
        format!("{}_hd.jpg", slug(artist, title))
    }

    fn read(path: &Path) -> Vec<u8> {
        std::fs::read(path).unwrap()
    }

    #[test]
    fn test_second_pass_is_idempotent() {
        let f = fixture();
        write_hd(&f.layout, "Almeida Júnior", "Saudade", 1000, 500);
        write_hd(&f.layout, "Pedro Américo", "A Carioca", 200, 300);
        let rows = vec![
            row("Almeida Júnior", "Saudade", "1899"),
            row("Pedro Américo", "A Carioca", "1882"),
            row("Sem Imagem", "Nada", ""),
        ];

        let analyzer = MockAnalyzer::default();
        analyzer.respond(&hd_name("Almeida Júnior", "Saudade"), one_face(100.0, 50.0, 200.0, 200.0));

        let mut store = ArtworkStore::load(&f.store_path).unwrap();
        let first = merge_rows(&mut store, &rows, &f.layout, &analyzer);
        store.save(&f.store_path).unwrap();
        assert_eq!(analyzer.calls.get(), 2);
        assert_eq!(first.added, 2);
        assert_eq!(first.skipped, 1);
        let bytes_after_first = read(&f.store_path);

        let mut store = ArtworkStore::load(&f.store_path).unwrap();
        let second = merge_rows(&mut store, &rows, &f.layout, &analyzer);
        store.save(&f.store_path).unwrap();

        assert_eq!(analyzer.calls.get(), 2, "no new analysis calls on the second pass");
        assert_eq!(second.refreshed, 2);
        assert_eq!(read(&f.store_path), bytes_after_first);

        let saudade = store.get(&slug("Almeida Júnior", "Saudade")).unwrap();
        assert_eq!(
            saudade.face_rectangle(),
            Some(&FaceRect { left: 0.1, top: 0.1, width: 0.2, height: 0.4 })
        );
    }

    #[test]
    fn test_failed_analysis_is_retried_next_run() {
        let f = fixture();
        write_hd(&f.layout, "Anita Malfatti", "A Boba", 100, 100);
        let rows = vec![row("Anita Malfatti", "A Boba", "1915")];
        let s = slug("Anita Malfatti", "A Boba");

        let analyzer = MockAnalyzer::default();
        analyzer.fail.set(true);

        let mut store = ArtworkStore::default();
        let first = merge_rows(&mut store, &rows, &f.layout, &analyzer);
        assert_eq!(first.added, 1);
        assert_eq!(first.analysis_failed, 1);
        assert_eq!(store.get(&s).unwrap().analysis, Analysis::Pending);
        store.save(&f.store_path).unwrap();

        // The pending record has no `faces` key on disk
        let json: serde_json::Value = serde_json::from_slice(&read(&f.store_path)).unwrap();
        assert!(json[&s].get("faces").is_none());

        analyzer.fail.set(false);
        let mut store = ArtworkStore::load(&f.store_path).unwrap();
        let second = merge_rows(&mut store, &rows, &f.layout, &analyzer);
        assert_eq!(analyzer.calls.get(), 2);
        assert_eq!(second.retried, 1);
        assert_eq!(second.analyzed, 1);
        assert_eq!(
            store.get(&s).unwrap().analysis,
            Analysis::Analyzed(FaceAnalysis { faces: 0, face: None })
        );
    }

    #[test]
    fn test_zero_faces_is_not_retried() {
        let f = fixture();
        write_hd(&f.layout, "Tarsila do Amaral", "Paisagem", 100, 100);
        let rows = vec![row("Tarsila do Amaral", "Paisagem", "1925")];

        let analyzer = MockAnalyzer::default();
        let mut store = ArtworkStore::default();
        merge_rows(&mut store, &rows, &f.layout, &analyzer);
        merge_rows(&mut store, &rows, &f.layout, &analyzer);
        merge_rows(&mut store, &rows, &f.layout, &analyzer);

        assert_eq!(analyzer.calls.get(), 1);
        let s = slug("Tarsila do Amaral", "Paisagem");
        assert_eq!(
            store.get(&s).unwrap().analysis,
            Analysis::Analyzed(FaceAnalysis { faces: 0, face: None })
        );
    }

    #[test]
    fn test_year_change_refreshes_without_analysis() {
        let f = fixture();
        write_hd(&f.layout, "Eliseu Visconti", "Gioventu", 100, 100);
        let analyzer = MockAnalyzer::default();
        let mut store = ArtworkStore::default();

        merge_rows(&mut store, &[row("Eliseu Visconti", "Gioventu", "1898")], &f.layout, &analyzer);
        let s = slug("Eliseu Visconti", "Gioventu");
        store.get_mut(&s).unwrap().dominant_color = Some("#ABCDEF".to_string());
        assert_eq!(analyzer.calls.get(), 1);

        let result =
            merge_rows(&mut store, &[row("Eliseu Visconti", "Gioventu", "1899")], &f.layout, &analyzer);
        assert_eq!(result.refreshed, 1);
        assert_eq!(analyzer.calls.get(), 1);

        let record = store.get(&s).unwrap();
        assert_eq!(record.info.year, "1899");
        assert!(record.is_analyzed());
        assert_eq!(record.dominant_color.as_deref(), Some("#ABCDEF"));
    }

    #[test]
    fn test_retry_keeps_existing_color() {
        let f = fixture();
        write_hd(&f.layout, "A", "B", 10, 10);
        let analyzer = MockAnalyzer::default();
        analyzer.fail.set(true);

        let mut store = ArtworkStore::default();
        merge_rows(&mut store, &[row("A", "B", "")], &f.layout, &analyzer);
        store.get_mut("a_b").unwrap().dominant_color = Some("#010101".to_string());

        analyzer.fail.set(false);
        let action = merge_record(
            &mut store,
            builder::build(&row("A", "B", ""), &f.layout).unwrap().unwrap(),
            &f.layout,
            &analyzer,
        );
        assert_eq!(action, MergeAction::Analyzed);
        assert_eq!(store.get("a_b").unwrap().dominant_color.as_deref(), Some("#010101"));
    }

    #[test]
    fn test_colliding_slugs_later_row_wins() {
        let f = fixture();
        write_hd(&f.layout, "José Pancetti", "Marinha", 10, 10);
        let analyzer = MockAnalyzer::default();
        analyzer.fail.set(true);

        let rows = vec![
            row("José Pancetti", "Marinha", "1940"),
            row("Jose Pancetti", "marinha!", "1941"),
        ];
        let mut store = ArtworkStore::default();
        merge_rows(&mut store, &rows, &f.layout, &analyzer);

        assert_eq!(store.len(), 1);
        let record = store.get(&slug("José Pancetti", "Marinha")).unwrap();
        assert_eq!(record.info.year, "1941");
        assert_eq!(record.info.artist, "Jose Pancetti");
    }

    #[test]
    fn test_build_failures_do_not_stop_the_pass() {
        let f = fixture();
        write_hd(&f.layout, "Good", "Row", 10, 10);
        let bad = f.layout.hd(&slug("Bad", "Image"));
        std::fs::write(&bad, b"garbage").unwrap();

        // No dimensions, so the builder has to decode the broken image
        let bad_row: ArtworkRow = [(COL_ARTIST, "Bad"), (COL_TITLE, "Image")].into_iter().collect();

        let analyzer = MockAnalyzer::default();
        let mut store = ArtworkStore::default();
        let result = merge_rows(&mut store, &[bad_row, row("Good", "Row", "")], &f.layout, &analyzer);

        assert_eq!(result.failed, 1);
        assert_eq!(result.added, 1);
        assert!(store.get("good_row").is_some());
        assert!(store.get("bad_image").is_none());
    }

    #[test]
    fn test_non_finite_dimensions_keep_store_loadable() {
        let f = fixture();
        write_hd(&f.layout, "Oscar Pereira da Silva", "Escrava Romana", 10, 10);
        write_hd(&f.layout, "Good", "Row", 10, 10);
        let odd: ArtworkRow = [
            (COL_ARTIST, "Oscar Pereira da Silva"),
            (COL_TITLE, "Escrava Romana"),
            (COL_WIDTH_CM, "NaN"),
            (COL_HEIGHT_CM, "inf"),
        ]
        .into_iter()
        .collect();

        let analyzer = MockAnalyzer::default();
        let mut store = ArtworkStore::default();
        let result = merge_rows(&mut store, &[odd, row("Good", "Row", "")], &f.layout, &analyzer);
        assert_eq!(result.failed, 1);
        assert_eq!(result.added, 1);

        store.save(&f.store_path).unwrap();
        let reloaded = ArtworkStore::load(&f.store_path).unwrap();
        assert_eq!(reloaded, store);
    }
}
