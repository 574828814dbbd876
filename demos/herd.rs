use sf_cache::test::simulation::HerdSimulation;
use sf_cache::test::types::Result;

#[tokio::main]
async fn main() -> Result<()> {
    HerdSimulation::run()
        .await
        .inspect_err(|err| err.report_with_backtrace("Herd simulation failed"))
}
