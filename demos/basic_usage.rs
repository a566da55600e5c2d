use axona_importer::open;
use ndarray::s;
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    // Open session from its .set file
    let session = open("data/1703201701.set")?;

    // Print basic session information
    println!("Session: {}", session.session());
    println!("Duration: {} s", session.duration());
    println!("ADC full scale: {} uV", session.adc_fullscale());
    println!("Tracked spots: {}", session.tracked_spots_count());
    if let Some(start) = session.start_datetime() {
        println!("Started: {}", start);
    }

    // Spike data per channel group
    let groups = session.channel_groups()?;
    println!("\nNumber of channel groups: {}", groups.len());
    println!("Number of channels: {}", session.channel_count()?);

    for group in groups {
        match group.spike_train() {
            Ok(train) => {
                println!(
                    "  {}: {} spikes x {} samples at {} Hz",
                    group, train.spike_count, train.samples_per_spike, train.sample_rate
                );

                // Show first waveform of the first channel
                if train.spike_count > 0 {
                    let waveform = train.waveforms.slice(s![0, 0, ..]);
                    let num_samples = std::cmp::min(5, waveform.len());
                    println!("    First waveform (first {} samples):", num_samples);
                    for i in 0..num_samples {
                        println!("      {}: {:.2} uV", i, waveform[i]);
                    }
                }
            }
            Err(e) => println!("  {}: unreadable ({})", group, e),
        }
    }

    // Continuous signals
    let signals = session.analog_signals()?;
    println!("\nContinuous signals:");
    for signal in signals {
        println!("  {}", signal);
    }

    // Tracking and events are optional
    match session.tracking() {
        Ok(tracking) => println!("\nTracking: {}", tracking),
        Err(e) => println!("\nNo tracking data: {}", e),
    }
    match session.inp_events() {
        Ok(events) => println!("Events: {}", events),
        Err(e) => println!("No input events: {}", e),
    }

    Ok(())
}
