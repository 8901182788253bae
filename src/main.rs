#[macro_use]
extern crate rocket;

#[launch]
fn rocket() -> _ {
    let rocket = product_ingest::rocket();
    log::info!("starting product lookup service");
    rocket
}
