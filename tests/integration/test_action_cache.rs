use anyhow::Result;
use bytes::Bytes;
use prost::Message;
use re_proto::build::bazel::remote::execution::v2::{
    ActionResult, Directory, FileNode, OutputDirectory, OutputFile, Tree,
};
use re_storage::storage::RequestContext;
use re_storage::DigestInfo;
use re_storage_integration_tests::{blob, init_tracing, StorageHarness};

const CHECKED_CONFIG: &str = r#"
check_action_cache_completeness = true
completeness_check_probability = 1000

[cas]
backend = "local"
base_path = "{root}/cas"

[action_cache]
backend = "local"
base_path = "{root}/ac"
"#;

const UNCHECKED_CONFIG: &str = r#"
check_action_cache_completeness = false

[cas]
backend = "memory"

[action_cache]
backend = "memory"
"#;

fn result_with_outputs(outputs: &[DigestInfo], tree: Option<DigestInfo>) -> ActionResult {
    ActionResult {
        output_files: outputs
            .iter()
            .enumerate()
            .map(|(i, digest)| OutputFile {
                path: format!("out/file{i}"),
                digest: Some(digest.to_proto()),
                ..Default::default()
            })
            .collect(),
        output_directories: tree
            .map(|digest| OutputDirectory {
                path: "out/dir".to_string(),
                tree_digest: Some(digest.to_proto()),
                ..Default::default()
            })
            .into_iter()
            .collect(),
        exit_code: 0,
        ..Default::default()
    }
}

fn tree_listing(files: &[DigestInfo]) -> Bytes {
    let directory = |names: &str, digests: &[DigestInfo]| Directory {
        files: digests
            .iter()
            .enumerate()
            .map(|(i, digest)| FileNode {
                name: format!("{names}{i}"),
                digest: Some(digest.to_proto()),
                is_executable: false,
            })
            .collect(),
        ..Default::default()
    };
    let (root_files, child_files) = files.split_at(files.len() / 2);
    let tree = Tree {
        root: Some(directory("root", root_files)),
        children: vec![directory("child", child_files)],
    };
    Bytes::from(tree.encode_to_vec())
}

#[tokio::test]
async fn test_complete_result_is_a_hit() -> Result<()> {
    init_tracing();
    let harness = StorageHarness::start(CHECKED_CONFIG).await?;
    let ctx = RequestContext::new("main");

    let output = harness.cas.put_blob(&ctx, Bytes::from_static(b"binary")).await?;
    let stdout = harness.cas.put_blob(&ctx, Bytes::from_static(b"build ok\n")).await?;
    let nested_a = harness.cas.put_blob(&ctx, Bytes::from_static(b"a")).await?;
    let nested_b = harness.cas.put_blob(&ctx, Bytes::from_static(b"b")).await?;
    let tree = harness.cas.put_blob(&ctx, tree_listing(&[nested_a, nested_b])).await?;

    let mut result = result_with_outputs(&[output], Some(tree));
    result.stdout_digest = Some(stdout.to_proto());

    let (action, _) = blob(b"action: link binary");
    harness.action_cache.put_action_result(&ctx, &action, &result).await?;

    let cached = harness.action_cache.get_action_result(&ctx, &action).await?;
    assert_eq!(cached, Some(result));
    Ok(())
}

#[tokio::test]
async fn test_missing_output_turns_hit_into_miss() -> Result<()> {
    init_tracing();
    let harness = StorageHarness::start(CHECKED_CONFIG).await?;
    let ctx = RequestContext::new("main");

    let present = harness.cas.put_blob(&ctx, Bytes::from_static(b"present")).await?;
    let (evicted, _) = blob(b"evicted from the CAS");

    let (action, _) = blob(b"action: compile");
    let result = result_with_outputs(&[present, evicted], None);
    harness.action_cache.put_action_result(&ctx, &action, &result).await?;

    assert_eq!(harness.action_cache.get_action_result(&ctx, &action).await?, None);
    Ok(())
}

#[tokio::test]
async fn test_missing_tree_member_turns_hit_into_miss() -> Result<()> {
    init_tracing();
    let harness = StorageHarness::start(CHECKED_CONFIG).await?;
    let ctx = RequestContext::new("main");

    let kept = harness.cas.put_blob(&ctx, Bytes::from_static(b"kept")).await?;
    let (lost, _) = blob(b"lost child file");
    let tree = harness.cas.put_blob(&ctx, tree_listing(&[kept, lost])).await?;

    let (action, _) = blob(b"action: package");
    let result = result_with_outputs(&[], Some(tree));
    harness.action_cache.put_action_result(&ctx, &action, &result).await?;

    assert_eq!(harness.action_cache.get_action_result(&ctx, &action).await?, None);
    Ok(())
}

#[tokio::test]
async fn test_empty_outputs_need_no_cas_entry() -> Result<()> {
    init_tracing();
    let harness = StorageHarness::start(CHECKED_CONFIG).await?;
    let ctx = RequestContext::new("main");

    let (empty, _) = blob(b"");
    let (action, _) = blob(b"action: touch");
    let result = result_with_outputs(&[empty], None);
    harness.action_cache.put_action_result(&ctx, &action, &result).await?;

    assert_eq!(
        harness.action_cache.get_action_result(&ctx, &action).await?,
        Some(result)
    );
    Ok(())
}

#[tokio::test]
async fn test_unchecked_cache_returns_incomplete_results() -> Result<()> {
    init_tracing();
    let harness = StorageHarness::start(UNCHECKED_CONFIG).await?;
    let ctx = RequestContext::new("main");

    let (evicted, _) = blob(b"never uploaded");
    let (action, _) = blob(b"action: test");
    let result = result_with_outputs(&[evicted], None);
    harness.action_cache.put_action_result(&ctx, &action, &result).await?;

    assert_eq!(
        harness.action_cache.get_action_result(&ctx, &action).await?,
        Some(result)
    );
    Ok(())
}

#[tokio::test]
async fn test_unknown_action_is_a_miss() -> Result<()> {
    init_tracing();
    let harness = StorageHarness::start(CHECKED_CONFIG).await?;
    let ctx = RequestContext::new("main");

    let (action, _) = blob(b"action: never run");
    assert_eq!(harness.action_cache.get_action_result(&ctx, &action).await?, None);
    Ok(())
}
