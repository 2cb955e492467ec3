use criterion::{black_box, criterion_group, criterion_main, Criterion};

use ble_midi_bridge::parser::BleMidiParser;

fn joined_channel_voice_messages(c: &mut Criterion) {
    let packet = [0x80, 0x81, 0x90, 0x40, 0x7F, 0x81, 0xE0, 0x10, 0x42];

    c.bench_function("parse joined channel-voice messages", |b| {
        b.iter(|| {
            let mut parser = BleMidiParser::new();
            loop {
                match parser.parse(black_box(&packet)) {
                    Ok(ble_midi_bridge::ParseOutcome::MessageEmitted { .. }) => continue,
                    _ => break,
                }
            }
        });
    });
}

fn fragmented_sysex(c: &mut Criterion) {
    let mut packet = vec![0x80u8, 0x81, 0xF0];
    packet.extend(std::iter::repeat(0x01).take(200));

    c.bench_function("parse large sysex fragment", |b| {
        b.iter(|| {
            let mut parser = BleMidiParser::new();
            let _ = parser.parse(black_box(&packet));
        });
    });
}

criterion_group!(benches, joined_channel_voice_messages, fragmented_sysex);
criterion_main!(benches);
