struct Greeter {
    name: String,
}

#[modkit::module(name = "Greeter")]
impl Greeter {}

fn main() {}
