use crate::domain::color::{Gamut, Xy};

/// Clamps an xy coordinate into the gamut triangle. Coordinates already
/// inside pass through unchanged; anything outside lands on the nearest
/// point of the triangle's boundary.
pub fn clip_to_gamut(coordinate: Xy, gamut: &Gamut) -> Xy {
    if is_in_gamut(&coordinate, gamut) {
        return coordinate;
    }

    // Project onto all three edges and keep whichever projection is nearest
    let point_red_green = closest_point_on_line(gamut.red(), gamut.green(), &coordinate);
    let point_green_blue = closest_point_on_line(gamut.green(), gamut.blue(), &coordinate);
    let point_blue_red = closest_point_on_line(gamut.blue(), gamut.red(), &coordinate);

    let distance_red_green = squared_distance(&coordinate, &point_red_green);
    let distance_green_blue = squared_distance(&coordinate, &point_green_blue);
    let distance_blue_red = squared_distance(&coordinate, &point_blue_red);

    if distance_red_green <= distance_green_blue && distance_red_green <= distance_blue_red {
        point_red_green
    } else if distance_green_blue <= distance_blue_red {
        point_green_blue
    } else {
        point_blue_red
    }
}

/// Barycentric containment test against the triangle spanned by the three
/// gamut corners.
fn is_in_gamut(coordinate: &Xy, gamut: &Gamut) -> bool {
    let v0 = Xy::new(gamut.blue().x - gamut.red().x, gamut.blue().y - gamut.red().y);
    let v1 = Xy::new(gamut.green().x - gamut.red().x, gamut.green().y - gamut.red().y);
    let v2 = Xy::new(coordinate.x - gamut.red().x, coordinate.y - gamut.red().y);

    let dot00 = v0.x * v0.x + v0.y * v0.y;
    let dot01 = v0.x * v1.x + v0.y * v1.y;
    let dot02 = v0.x * v2.x + v0.y * v2.y;
    let dot11 = v1.x * v1.x + v1.y * v1.y;
    let dot12 = v1.x * v2.x + v1.y * v2.y;

    let inv_denom = 1.0 / (dot00 * dot11 - dot01 * dot01);
    let u = (dot11 * dot02 - dot01 * dot12) * inv_denom;
    let v = (dot00 * dot12 - dot01 * dot02) * inv_denom;

    u >= 0.0 && v >= 0.0 && u + v <= 1.0
}

/// Orthogonal projection of `p` onto the segment `a`..`b`, with the
/// projection parameter clamped to the segment's ends.
fn closest_point_on_line(a: &Xy, b: &Xy, p: &Xy) -> Xy {
    let ap = Xy::new(p.x - a.x, p.y - a.y);
    let ab = Xy::new(b.x - a.x, b.y - a.y);
    let ab2 = ab.x * ab.x + ab.y * ab.y;
    let ap_ab = ap.x * ab.x + ap.y * ab.y;
    let t = (ap_ab / ab2).max(0.0).min(1.0);
    Xy::new(a.x + ab.x * t, a.y + ab.y * t)
}

fn squared_distance(a: &Xy, b: &Xy) -> f64 {
    (a.x - b.x).powi(2) + (a.y - b.y).powi(2)
}
