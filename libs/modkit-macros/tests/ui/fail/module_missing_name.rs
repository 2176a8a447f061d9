struct Greeter;

#[modkit::module]
impl Greeter {}

fn main() {}
