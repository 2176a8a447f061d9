use std::collections::HashMap;

#[derive(Default)]
struct Greeter;

#[modkit::module(name = "Greeter")]
impl Greeter {
    #[init(phase = 60)]
    async fn warm(&self, _context: &modkit::Context, _params: &HashMap<String, String>) -> anyhow::Result<()> {
        Ok(())
    }

    #[request(path = "/greet/:name", phase = 100)]
    async fn greet(&self, _context: &modkit::Context, _params: &HashMap<String, String>) -> anyhow::Result<()> {
        Ok(())
    }
}

fn main() {}
