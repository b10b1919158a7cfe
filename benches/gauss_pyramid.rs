// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use criterion::{criterion_group, criterion_main, Criterion};
use sparse_odometry_rs::core::gauss_pyramid::{gauss_pyr_down, gauss_pyr_down_buf_size};
use sparse_odometry_rs::core::image::ImageBuf;

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("gauss_pyr_down 640x480", |b| {
        let mut src = ImageBuf::zeroed(640, 480).unwrap();
        for v in 0..480 {
            for u in 0..640 {
                src.set(u, v, ((u * 3 + v * 7) % 256) as u8);
            }
        }
        let mut dst = ImageBuf::zeroed(320, 240).unwrap();
        let mut buf = vec![0u16; gauss_pyr_down_buf_size(640, 480)];
        b.iter(|| gauss_pyr_down(&src, &mut dst, &mut buf))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
