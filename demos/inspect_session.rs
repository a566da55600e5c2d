use axona_importer::open;
use std::env;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <path_to_set_file_or_base_name>", args[0]);
        std::process::exit(1);
    }

    let path = &args[1];
    println!("Opening: {}", path);

    let session = match open(path) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("\n✗ Error opening session: {}", e);
            std::process::exit(1);
        }
    };

    println!("\n✓ {}", session);
    match session.related_files() {
        Ok(files) => {
            println!("  Related files: {}", files.len());
            for (i, file) in files.iter().enumerate() {
                println!("    {}: {}", i + 1, file.display());
            }
        }
        Err(e) => eprintln!("  Unable to list files: {}", e),
    }

    match session.cuts() {
        Ok(cuts) => {
            println!("\n  Cuts:");
            for cut in cuts {
                let clusters = cut.indices.iter().max().map_or(0, |&m| m + 1);
                println!(
                    "    channel group {}: {} spikes in {} clusters",
                    cut.channel_group_id,
                    cut.indices.len(),
                    clusters
                );
            }
        }
        Err(e) => println!("\n  No cuts loaded: {}", e),
    }

    if let Ok(tracking) = session.tracking() {
        let total = tracking.positions.len();
        let missing = tracking.positions.iter().filter(|v| v.is_nan()).count();
        println!("\n  Tracking: {} of {} coordinates missing", missing, total);
    }
}
