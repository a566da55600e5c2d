use axona_importer::{AxonaError, EventType, Session};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const DATA_END: &[u8] = b"\r\ndata_end\r\n";
const SAMPLES_PER_SPIKE: usize = 4;

fn write_binary(path: &Path, header: &str, body: &[u8], tail: &[u8]) {
    let mut bytes = header.as_bytes().to_vec();
    bytes.extend_from_slice(b"data_start");
    bytes.extend_from_slice(body);
    bytes.extend_from_slice(tail);
    fs::write(path, bytes).unwrap();
}

/// Raw sample for spike `s`, channel `c`, sample `k`.
fn raw_sample(s: usize, c: usize, k: usize) -> i8 {
    (s as i8 * 10 + c as i8 * 3 - k as i8) - 20
}

/// Builds a two-tetrode session with every kind of sibling file.
struct Fixture {
    dir: TempDir,
    spikes_per_group: [usize; 2],
}

impl Fixture {
    fn new() -> Self {
        let fixture = Fixture {
            dir: TempDir::new().unwrap(),
            spikes_per_group: [3, 2],
        };
        fixture.write_set();
        for (group, &n) in fixture.spikes_per_group.iter().enumerate() {
            fixture.write_spikes(group + 1, n, DATA_END);
        }
        fixture.write_eeg("eeg", DATA_END);
        fixture.write_eeg("egf2", DATA_END);
        fixture.write_pos();
        fixture.write_inp();
        fixture
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn open(&self) -> Session {
        Session::open(self.path("rec.set")).unwrap()
    }

    fn write_set(&self) {
        let mut text = String::from(
            "trial_date Friday, 01 Nov 2013\r\ntrial_time 09:30:00\r\nduration 600\r\n\
             ADC_fullscale_mv 1500\r\ntracked_spots 2\r\n",
        );
        for ch in 0..8 {
            text.push_str(&format!("gain_ch_{} {}\r\n", ch, 1000 * (ch + 1)));
        }
        // .eeg -> channel 2 referenced against channel 5
        text.push_str("EEG_ch_1 2\r\nmode_ch_2 0\r\nb_in_ch_2 1\r\nref_1 5\r\n");
        // .egf2 -> channel 7 referenced against channel 0
        text.push_str("EEG_ch_2 7\r\nmode_ch_7 0\r\nb_in_ch_7 0\r\nref_0 0\r\n");
        fs::write(self.path("rec.set"), text).unwrap();
    }

    fn write_spikes(&self, file_number: usize, num_spikes: usize, tail: &[u8]) {
        let header = format!(
            "num_chans 4\r\ntimebase 96000 hz\r\nbytes_per_timestamp 4\r\n\
             samples_per_spike {}\r\nbytes_per_sample 1\r\nnum_spikes {}\r\n",
            SAMPLES_PER_SPIKE, num_spikes
        );
        let mut body = Vec::new();
        for s in 0..num_spikes {
            let t = (s as u32 + 1) * 9600;
            for c in 0..4 {
                body.extend_from_slice(&t.to_be_bytes());
                for k in 0..SAMPLES_PER_SPIKE {
                    body.push(raw_sample(s, c, k) as u8);
                }
            }
        }
        write_binary(&self.path(&format!("rec.{}", file_number)), &header, &body, tail);
    }

    fn write_eeg(&self, extension: &str, tail: &[u8]) {
        let count_key = if extension.starts_with("eeg") { "num_EEG_samples" } else { "num_EGF_samples" };
        let header = format!(
            "num_chans 1\r\nsample_rate 250.0 hz\r\nbytes_per_sample 1\r\n{} 4\r\n",
            count_key
        );
        write_binary(&self.path(&format!("rec.{}", extension)), &header, &[64, 0x80, 0, 127], tail);
    }

    fn write_pos(&self) {
        let header = "timebase 50 hz\r\nsample_rate 50.0 hz\r\nEEG_samples_per_position 5\r\n\
                      bytes_per_timestamp 4\r\nbytes_per_coord 2\r\nnum_pos_samples 2\r\n\
                      window_min_x 0\r\nwindow_max_x 500\r\nwindow_min_y 0\r\nwindow_max_y 250\r\n";
        let mut body = Vec::new();
        for (t, coords) in [(0i32, [250i16, 1023, 100, 50]), (1, [125, 125, 1023, 1023])] {
            body.extend_from_slice(&t.to_be_bytes());
            for c in coords {
                body.extend_from_slice(&c.to_be_bytes());
            }
            body.extend_from_slice(&[0, 0, 0, 12, 0, 0, 0, 7]);
        }
        write_binary(&self.path("rec.pos"), header, &body, DATA_END);
    }

    fn write_inp(&self) {
        // num_inp_samples deliberately undercounts (outputs are excluded)
        let header = "timebase 1000 hz\r\nduration 600\r\nnum_inp_samples 2\r\n\
                      bytes_per_timestamp 4\r\nbytes_per_type 1\r\nbytes_per_value 2\r\n";
        let mut body = Vec::new();
        for (t, tag, value) in [
            (100i32, b'I', [0u8, 3]),
            (200, b'O', [0, 1]),
            (300, b'O', [0, 0]),
            (400, b'K', [0, b' ']),
        ] {
            body.extend_from_slice(&t.to_be_bytes());
            body.push(tag);
            body.extend_from_slice(&value);
        }
        write_binary(&self.path("rec.inp"), header, &body, DATA_END);
    }

    fn write_cut(&self, file_number: usize, indices: &str) {
        let text = format!(
            "n_clusters: 2\nn_channels: 4\nn_params: 2\nExact_cut_for: rec spikes: 0\n{}\n",
            indices
        );
        fs::write(self.path(&format!("rec_{}.cut", file_number)), text).unwrap();
    }
}

#[test]
fn spike_counts_match_headers() {
    let fixture = Fixture::new();
    let session = fixture.open();

    let groups = session.channel_groups().unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(session.channel_count().unwrap(), 8);

    let decoded: usize = groups.iter().map(|g| g.spike_train().unwrap().times.len()).sum();
    let declared: usize = groups
        .iter()
        .map(|g| g.attrs.int("num_spikes").unwrap() as usize)
        .sum();
    assert_eq!(decoded, declared);
    assert_eq!(decoded, fixture.spikes_per_group.iter().sum::<usize>());
}

#[test]
fn spike_waveforms_are_scaled_and_inverted() {
    let fixture = Fixture::new();
    let session = fixture.open();
    let group = session.channel_group_by_id(1).unwrap().unwrap();
    let train = group.spike_train().unwrap();

    assert_eq!(train.num_spikes(), 2);
    assert_eq!(train.num_chans(), 4);
    assert_eq!(train.waveforms.shape(), &[2, 4, SAMPLES_PER_SPIKE]);
    assert_eq!(train.times.to_vec(), vec![0.1, 0.2]);

    for s in 0..2 {
        for c in 0..4 {
            // group 1 channel c uses gain_ch_{4 + c}
            let gain = 1000.0 * (4 + c + 1) as f64;
            for k in 0..SAMPLES_PER_SPIKE {
                let expected = (raw_sample(s, c, k) as f64 / 128.0) * (1_500_000.0 / gain);
                assert_eq!(train.waveforms[[s, c, k]], -expected);
            }
        }
    }
}

#[test]
fn channel_lookup_by_global_index() {
    let fixture = Fixture::new();
    let session = fixture.open();

    let group = session.channel_group(5).unwrap().unwrap();
    assert_eq!(group.channel_group_id, 1);
    assert!(session.channel_group(8).unwrap().is_none());
}

#[test]
fn analog_signals_follow_reference_chain() {
    let fixture = Fixture::new();
    let session = fixture.open();
    let signals = session.analog_signals().unwrap();
    assert_eq!(signals.len(), 2);

    // rec.eeg: original channel 5, gain_ch_5 = 6000
    let eeg = &signals[0];
    assert_eq!(eeg.channel_id, 5);
    assert_eq!(eeg.sample_rate, 250.0);
    let scale = 1_500_000.0 / 6000.0;
    assert_eq!(
        eeg.trace().to_vec(),
        vec![0.5 * scale, -scale, 0.0, (127.0 / 128.0) * scale]
    );

    // rec.egf2: original channel 0, gain_ch_0 = 1000
    let egf = &signals[1];
    assert_eq!(egf.channel_id, 0);
    assert_eq!(egf.trace()[1], -1500.0);
}

#[test]
fn corrupt_continuous_file_leaves_the_others_readable() {
    let fixture = Fixture::new();
    fixture.write_eeg("egf2", b"\r\ngarbage!!\r\n");
    let session = fixture.open();

    let signals = session.analog_signals().unwrap();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].channel_id, 5);
    assert!(signals[0].attrs.text("raw_filename").unwrap().ends_with("rec.eeg"));
}

#[test]
fn continuous_file_without_header_sentinel_is_skipped() {
    let fixture = Fixture::new();
    fs::write(fixture.path("rec.eeg3"), "num_chans 1\r\nsample_rate 250.0 hz\r\n").unwrap();
    let session = fixture.open();

    let signals = session.analog_signals().unwrap();
    assert_eq!(signals.len(), 2);
    assert!(signals
        .iter()
        .all(|s| !s.attrs.text("raw_filename").unwrap().ends_with("rec.eeg3")));
}

#[test]
fn overflowing_spike_header_is_corrupt() {
    let fixture = Fixture::new();
    let header = "num_chans 4\r\nnum_spikes 4611686018427387904\r\n";
    write_binary(&fixture.path("rec.1"), header, &[], DATA_END);
    let session = fixture.open();

    let group = session.channel_group_by_id(0).unwrap().unwrap();
    match group.spike_train().unwrap_err() {
        AxonaError::CorruptFile { path, .. } => assert_eq!(path, fixture.path("rec.1")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(session.channel_group_by_id(1).unwrap().unwrap().spike_train().unwrap().spike_count, 2);
}

#[test]
fn tracking_marks_missing_axes() {
    let fixture = Fixture::new();
    let session = fixture.open();
    let tracking = session.tracking().unwrap();

    assert_eq!(tracking.times.to_vec(), vec![0.0, 0.02]);
    assert!(!tracking.trailing_data);
    assert_eq!(tracking.positions.shape(), &[2, 4]);
    assert_eq!(tracking.positions[[0, 0]], 0.5);
    assert!(tracking.positions[[0, 1]].is_nan());
    assert_eq!(tracking.positions[[0, 2]], 0.2);
    assert_eq!(tracking.positions[[0, 3]], 0.2);
    assert_eq!(tracking.positions[[1, 0]], 0.25);
    assert_eq!(tracking.positions[[1, 1]], 0.5);
    assert!(tracking.positions[[1, 2]].is_nan());
    assert!(tracking.positions[[1, 3]].is_nan());
}

#[test]
fn inp_event_count_comes_from_file_size() {
    let fixture = Fixture::new();
    let session = fixture.open();
    let events = session.inp_events().unwrap();

    assert_eq!(events.attrs.int("num_inp_samples").unwrap(), 2);
    assert_eq!(events.len(), 4);
    assert_eq!(
        events.event_types,
        vec![EventType::Input, EventType::Output, EventType::Output, EventType::Keypress]
    );
    assert_eq!(events.times.to_vec(), vec![0.1, 0.2, 0.3, 0.4]);
    assert_eq!(events.values[[3, 1]], b' ' as i8);
}

#[test]
fn corrupt_sentinel_is_isolated_to_its_file() {
    let fixture = Fixture::new();
    fixture.write_spikes(2, 2, b"\r\ndata_xxx\r\n");
    let session = fixture.open();

    let groups = session.channel_groups().unwrap();
    match groups[1].spike_train().unwrap_err() {
        AxonaError::CorruptFile { path, .. } => assert_eq!(path, fixture.path("rec.2")),
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(groups[0].spike_train().unwrap().spike_count, 3);
    assert_eq!(session.analog_signals().unwrap().len(), 2);
    assert!(session.tracking().is_ok());
    assert!(session.inp_events().is_ok());
}

#[test]
fn truncated_body_is_reported() {
    let fixture = Fixture::new();
    // Header declares 3 spikes, body holds 2
    let header = "num_chans 4\r\nsamples_per_spike 4\r\nnum_spikes 3\r\n";
    let body = vec![0u8; 2 * 4 * (4 + SAMPLES_PER_SPIKE)];
    write_binary(&fixture.path("rec.1"), header, &body, DATA_END);
    let session = fixture.open();

    let group = session.channel_group_by_id(0).unwrap().unwrap();
    assert!(matches!(
        group.spike_train(),
        Err(AxonaError::TruncatedFile { .. })
    ));
}

#[test]
fn cuts_are_checked_against_spike_counts() {
    let fixture = Fixture::new();
    fixture.write_cut(1, "0 1 1");
    fixture.write_cut(2, "1 0");
    let session = fixture.open();

    let cuts = session.cuts().unwrap();
    assert_eq!(cuts.len(), 2);
    assert_eq!(cuts[0].channel_group_id, 0);
    assert_eq!(cuts[0].indices.to_vec(), vec![0, 1, 1]);
    assert_eq!(cuts[1].channel_group_id, 1);
}

#[test]
fn cut_with_wrong_length_is_inconsistent() {
    let fixture = Fixture::new();
    fixture.write_cut(1, "0 1");
    let session = fixture.open();

    match session.cuts().unwrap_err() {
        AxonaError::InconsistentCutFile {
            channel_group_id,
            cut_len,
            spike_count,
            ..
        } => {
            assert_eq!(channel_group_id, 0);
            assert_eq!(cut_len, 2);
            assert_eq!(spike_count, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn cut_with_non_numeric_token_is_invalid() {
    let fixture = Fixture::new();
    fixture.write_cut(1, "0 1 one");
    let session = fixture.open();

    match session.cuts().unwrap_err() {
        AxonaError::InvalidCutFile { token, path } => {
            assert_eq!(token, "one");
            assert_eq!(path, fixture.path("rec_1.cut"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn decoded_data_is_cached() {
    let fixture = Fixture::new();
    let session = fixture.open();

    let first = session.tracking().unwrap().times.clone();
    let signals = session.analog_signals().unwrap().len();
    fs::remove_file(fixture.path("rec.pos")).unwrap();
    fs::remove_file(fixture.path("rec.eeg")).unwrap();

    assert_eq!(session.tracking().unwrap().times, first);
    assert_eq!(session.analog_signals().unwrap().len(), signals);
}

#[test]
fn related_files_lists_siblings_and_cuts() {
    let fixture = Fixture::new();
    fixture.write_cut(1, "0 1 1");
    fs::write(fixture.path("other.set"), "").unwrap();
    let session = fixture.open();

    let names: Vec<String> = session
        .related_files()
        .unwrap()
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec!["rec.1", "rec.2", "rec.eeg", "rec.egf2", "rec.inp", "rec.pos", "rec.set", "rec_1.cut"]
    );
    assert!(session.start_datetime().is_some());
}
