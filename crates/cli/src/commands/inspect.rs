use clap::Args;
use leaselock_core::LockStore;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Lock key.
    pub key: String,
}

pub async fn run(store: &dyn LockStore, args: &InspectArgs) -> anyhow::Result<()> {
    match store.get(&args.key).await? {
        Some(token) => println!("{} is locked (token {token}).", args.key),
        None => println!("{} is not locked.", args.key),
    }
    Ok(())
}
