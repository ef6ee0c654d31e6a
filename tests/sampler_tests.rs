use std::fs;
use std::sync::Arc;

use burn::tensor::backend::Backend;
use burn_ndarray::NdArray;
use tempfile::tempdir;

use gptgram::checkpoint::CHECKPOINT_NAME;
use gptgram::{
    ByteTokenizer, Config, Gpt, GptConfig, GramSampler, InitFrom, SamplingConfig, SharedTokenizer,
    Tokenizer, init_model, read_run_config, save_checkpoint, save_model, write_run_config,
};

type InferBackend = NdArray<f32>;

fn byte_model_config() -> GptConfig {
    GptConfig {
        block_size: 16,
        vocab_size: 256,
        n_layer: 1,
        n_head: 2,
        n_embd: 16,
        dropout: 0.0,
        bias: true,
    }
}

#[test]
fn replies_stop_before_the_first_newline() {
    let dir = tempdir().expect("tempdir");
    let transcript = dir.path().join("chat.txt");
    fs::write(&transcript, "Alice: hi there").expect("write transcript");

    let device = <InferBackend as Backend>::Device::default();
    let mut config = Config::default();
    config.gpt = byte_model_config();
    config.sampling = SamplingConfig {
        max_new_tokens: 24,
        user: "Bob".to_string(),
        ..SamplingConfig::default()
    };

    let model = init_model::<InferBackend>(&config, &device).expect("model");
    let tokenizer: SharedTokenizer = Arc::new(ByteTokenizer);
    let mut sampler = GramSampler::new(
        model,
        tokenizer,
        device,
        &config.sampling,
        Some(transcript.as_path()),
    )
    .expect("sampler");

    let expected_prompt: Vec<i64> = ByteTokenizer
        .encode("Alice: hi there\nBob: ")
        .expect("encode")
        .into_iter()
        .map(i64::from)
        .collect();
    assert_eq!(sampler.prompt_tokens(), expected_prompt.as_slice());

    for _ in 0..3 {
        let reply = sampler.generate(1.0, None).expect("reply");
        assert!(!reply.contains('\n'));
    }
}

#[test]
fn missing_prompt_file_is_reported() {
    let device = <InferBackend as Backend>::Device::default();
    let mut config = Config::default();
    config.gpt = byte_model_config();
    let model = init_model::<InferBackend>(&config, &device).expect("model");

    let result = GramSampler::new(
        model,
        Arc::new(ByteTokenizer),
        device,
        &config.sampling,
        Some(std::path::Path::new("no/such/chat.txt")),
    );
    let err = result.err().expect("missing file");
    assert!(format!("{err:#}").contains("chat.txt"));
}

#[test]
fn resume_restores_saved_weights() {
    let dir = tempdir().expect("tempdir");
    let device = <InferBackend as Backend>::Device::default();

    let mut config = Config::default();
    config.gpt = byte_model_config();
    config.io_metrics.out_dir = dir.path().to_path_buf();

    let model = init_model::<InferBackend>(&config, &device).expect("model");
    save_model(&model, &dir.path().join(CHECKPOINT_NAME)).expect("save");
    write_run_config(&config, dir.path()).expect("write config");

    let mut resume = config.clone();
    resume.io_metrics.init_from = InitFrom::Resume;
    // architecture comes from the run snapshot, not the current gpt section
    resume.gpt.n_layer = 3;
    let restored = init_model::<InferBackend>(&resume, &device).expect("resume");
    assert_eq!(restored.config().n_layer, 1);

    let sample = |model: Gpt<InferBackend>| {
        let tokenizer: SharedTokenizer = Arc::new(ByteTokenizer);
        let mut sampler =
            GramSampler::new(model, tokenizer, device.clone(), &config.sampling, None)
                .expect("sampler");
        sampler.generate(0.8, Some(20)).expect("reply")
    };
    assert_eq!(sample(model), sample(restored));
}

#[test]
fn resume_without_checkpoint_fails() {
    let dir = tempdir().expect("tempdir");
    let device = <InferBackend as Backend>::Device::default();
    let mut config = Config::default();
    config.gpt = byte_model_config();
    config.io_metrics.out_dir = dir.path().to_path_buf();
    write_run_config(&config, dir.path()).expect("write config");
    config.io_metrics.init_from = InitFrom::Resume;

    assert!(init_model::<InferBackend>(&config, &device).is_err());
}

#[test]
fn smaller_block_size_crops_loaded_model() {
    let dir = tempdir().expect("tempdir");
    let device = <InferBackend as Backend>::Device::default();

    let mut config = Config::default();
    config.gpt = byte_model_config();
    config.io_metrics.out_dir = dir.path().to_path_buf();
    let model = init_model::<InferBackend>(&config, &device).expect("model");
    save_model(&model, &dir.path().join(CHECKPOINT_NAME)).expect("save");
    write_run_config(&config, dir.path()).expect("write config");

    config.io_metrics.init_from = InitFrom::Resume;
    config.gpt.block_size = 8;
    let cropped = init_model::<InferBackend>(&config, &device).expect("resume");
    assert_eq!(cropped.block_size(), 8);
}

#[test]
fn mismatched_snapshot_is_an_error_not_a_panic() {
    let dir = tempdir().expect("tempdir");
    let device = <InferBackend as Backend>::Device::default();

    let mut config = Config::default();
    config.gpt = GptConfig {
        n_layer: 2,
        ..byte_model_config()
    };
    config.io_metrics.out_dir = dir.path().to_path_buf();
    let model = init_model::<InferBackend>(&config, &device).expect("model");
    save_model(&model, &dir.path().join(CHECKPOINT_NAME)).expect("save");

    // snapshot disagrees with the saved weights
    config.gpt.n_layer = 1;
    write_run_config(&config, dir.path()).expect("write config");
    config.io_metrics.init_from = InitFrom::Resume;

    let err = init_model::<InferBackend>(&config, &device).expect_err("layer mismatch");
    assert!(format!("{err:#}").contains("2 layers"));

    config.gpt.n_layer = 2;
    config.gpt.n_embd = 32;
    write_run_config(&config, dir.path()).expect("write config");
    let err = init_model::<InferBackend>(&config, &device).expect_err("width mismatch");
    assert!(format!("{err:#}").contains("shape"));
}

#[test]
fn checkpoint_snapshot_follows_the_built_model() {
    let dir = tempdir().expect("tempdir");
    let device = <InferBackend as Backend>::Device::default();

    let mut config = Config::default();
    config.gpt = byte_model_config();
    config.io_metrics.out_dir = dir.path().to_path_buf();

    // weights built from another architecture, then cropped, as a preset would be
    let built = GptConfig {
        n_layer: 2,
        ..byte_model_config()
    };
    let mut model = Gpt::<InferBackend>::new(built.init().expect("valid"), &device);
    model.crop_block_size(12).expect("crop");
    save_checkpoint(&model, &config, dir.path()).expect("save checkpoint");

    let snapshot = read_run_config(dir.path()).expect("read snapshot");
    assert_eq!(snapshot.gpt.n_layer, 2);
    assert_eq!(snapshot.gpt.block_size, 12);
    assert_eq!(snapshot.sampling, config.sampling);

    config.io_metrics.init_from = InitFrom::Resume;
    let restored = init_model::<InferBackend>(&config, &device).expect("resume");
    assert_eq!(restored.config(), model.config());
}
