use image::{GrayImage, Luma};
use imageproc::drawing::{draw_filled_rect_mut, draw_polygon_mut};
use imageproc::point::Point;
use imageproc::rect::Rect;

fn main() -> anyhow::Result<()> {
    let mut img = GrayImage::from_pixel(640, 480, Luma([40u8]));

    // A slightly rotated white card
    let card = [
        Point::new(150, 90),
        Point::new(480, 110),
        Point::new(470, 400),
        Point::new(140, 380),
    ];
    draw_polygon_mut(&mut img, &card, Luma([230u8]));

    // A thick "1" stroke in the middle
    draw_filled_rect_mut(&mut img, Rect::at(300, 170).of_size(24, 150), Luma([25u8]));

    img.save("test_card.png")?;
    println!("Created test_card.png (640x480 card with a digit stroke)");
    Ok(())
}
