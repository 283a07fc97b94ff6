use crate::cli::CommonArgs;
use crate::commands::{load_file_config, run_suites};
use anyhow::Result;
use ktest_sut::LocalSut;

pub async fn handle_host(common: CommonArgs) -> Result<bool> {
    let file_config = load_file_config(&common)?;
    run_suites(LocalSut::new(), &common, file_config.as_ref()).await
}
