use ronydb_config::read_passphrase_var;
use ronydb_crypto::Codec;
use ronydb_rotation::rotate;

use super::Context;

pub async fn cmd_rotate_keys(
    ctx: &Context,
    new_passphrase_env: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let old = ctx.codec()?;
    let new = Codec::new(
        read_passphrase_var(new_passphrase_env)?,
        ctx.settings.kdf_params(),
    );
    let store = ctx.store().await?;
    let tables = ctx.settings.rotation_tables();

    let report = rotate(store.as_ref(), &old, &new, &tables, &ctx.passphrases).await?;

    println!("{:<20} {:>9} {:>8} {:>7}", "TABLE", "SUCCEEDED", "SKIPPED", "FAILED");
    for (name, t) in &report.per_table {
        println!(
            "{:<20} {:>9} {:>8} {:>7}",
            name, t.succeeded, t.skipped, t.failed
        );
        for key in &t.failed_rows {
            eprintln!("  ✗ failed: {}", key);
        }
    }

    if !report.passphrase_persisted {
        return Err(format!(
            "{} rows failed; {} was left unchanged and still holds the old passphrase",
            report.total_failed(),
            ctx.passphrases.path().display()
        )
        .into());
    }
    println!(
        "✓ New passphrase saved to {}",
        ctx.passphrases.path().display()
    );
    Ok(())
}
