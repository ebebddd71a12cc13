use semantic_embeddings::fixtures::TinyModel;
use semantic_embeddings::SemanticEmbeddings;
use tempfile::TempDir;

/// Write `fixture` into a fresh temp dir and load it.
///
/// The TempDir is returned so the files outlive the test body.
pub fn load_fixture(fixture: TinyModel) -> (TempDir, SemanticEmbeddings) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    fixture.write(dir.path()).expect("Failed to write fixture model");
    let model = SemanticEmbeddings::load_from_dir(dir.path()).expect("Failed to load fixture model");
    (dir, model)
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}
